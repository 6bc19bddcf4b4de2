//! Read-only queries with offset/limit paging.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use stablepay_types::{
    AccountKeeper, Address, BankKeeper, BatchId, BatchSettlement, ChannelId, ClaimVerifier,
    ComplianceKeeper, Context, KvStore, MerchantConfig, PaymentChannel, RefundRecord, Result,
    Settlement, SettlementId, StablepayError, decode_json,
};

use crate::keeper::{SettlementKeeper, keys};

/// `limit == 0` asks for the largest page allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u32,
}

impl PageRequest {
    #[must_use]
    pub fn new(offset: u64, limit: u32) -> Self {
        Self { offset, limit }
    }

    /// Effective limit: `limit` capped at `max`, 0 meaning `max`.
    #[must_use]
    pub fn effective_limit(&self, max: u32) -> u32 {
        if self.limit == 0 { max } else { self.limit.min(max) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of records matching, ignoring paging.
    pub total: u64,
}

fn page_of<T: DeserializeOwned>(values: Vec<Vec<u8>>, page: PageRequest, max: u32) -> Result<Page<T>> {
    let total = values.len() as u64;
    let skip = usize::try_from(page.offset).unwrap_or(usize::MAX);
    let take = usize::try_from(page.effective_limit(max)).unwrap_or(usize::MAX);
    let items = values
        .into_iter()
        .skip(skip)
        .take(take)
        .map(|v| decode_json(&v))
        .collect::<Result<Vec<T>>>()?;
    Ok(Page { items, total })
}

impl<B, C, A, V> SettlementKeeper<B, C, A, V>
where
    B: BankKeeper,
    C: ComplianceKeeper,
    A: AccountKeeper,
    V: ClaimVerifier,
{
    fn page_size_cap(&self, ctx: &Context<'_>) -> Result<u32> {
        Ok(self.params(ctx)?.max_query_page_size)
    }

    fn paged<T: DeserializeOwned>(&self, ctx: &Context<'_>, prefix: &[u8], page: PageRequest) -> Result<Page<T>> {
        let values = ctx
            .store()
            .prefix_iter(prefix)
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        page_of(values, page, self.page_size_cap(ctx)?)
    }

    pub fn settlement(&self, ctx: &Context<'_>, id: SettlementId) -> Result<Settlement> {
        Self::load_settlement(ctx, id)
    }

    /// All settlements in id order.
    pub fn settlements(&self, ctx: &Context<'_>, page: PageRequest) -> Result<Page<Settlement>> {
        self.paged(ctx, keys::SETTLEMENT_PREFIX, page)
    }

    /// Settlements sent by `sender`, in id order.
    pub fn settlements_by_sender(
        &self,
        ctx: &Context<'_>,
        sender: &Address,
        page: PageRequest,
    ) -> Result<Page<Settlement>> {
        let prefix = keys::sender_prefix(sender);
        let ids: Vec<SettlementId> = ctx
            .store()
            .prefix_iter(&prefix)
            .into_iter()
            .map(|(key, _)| {
                key.strip_prefix(prefix.as_slice())
                    .and_then(SettlementId::from_key)
                    .ok_or_else(|| StablepayError::StoreCorruption("malformed sender index key".into()))
            })
            .collect::<Result<_>>()?;

        let total = ids.len() as u64;
        let skip = usize::try_from(page.offset).unwrap_or(usize::MAX);
        let take = usize::try_from(page.effective_limit(self.page_size_cap(ctx)?)).unwrap_or(usize::MAX);
        let items = ids
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|id| Self::load_settlement(ctx, id))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, total })
    }

    pub fn batch(&self, ctx: &Context<'_>, id: BatchId) -> Result<BatchSettlement> {
        Self::load_batch(ctx, id)
    }

    pub fn batches(&self, ctx: &Context<'_>, page: PageRequest) -> Result<Page<BatchSettlement>> {
        self.paged(ctx, keys::BATCH_PREFIX, page)
    }

    pub fn channel(&self, ctx: &Context<'_>, id: ChannelId) -> Result<PaymentChannel> {
        Self::load_channel(ctx, id)
    }

    pub fn channels(&self, ctx: &Context<'_>, page: PageRequest) -> Result<Page<PaymentChannel>> {
        self.paged(ctx, keys::CHANNEL_PREFIX, page)
    }

    pub fn merchant(&self, ctx: &Context<'_>, addr: &Address) -> Result<MerchantConfig> {
        Self::find_merchant(ctx, addr)?.ok_or_else(|| StablepayError::MerchantNotFound(addr.to_string()))
    }

    /// Merchants in address byte order.
    pub fn merchants(&self, ctx: &Context<'_>, page: PageRequest) -> Result<Page<MerchantConfig>> {
        self.paged(ctx, keys::MERCHANT_PREFIX, page)
    }

    /// Refund trail of a settlement, oldest first.
    pub fn refunds(&self, ctx: &Context<'_>, id: SettlementId) -> Result<Vec<RefundRecord>> {
        ctx.store()
            .prefix_iter(&keys::refund_prefix(id))
            .into_iter()
            .map(|(_, v)| decode_json(&v))
            .collect()
    }
}
