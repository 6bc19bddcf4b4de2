//! In-memory capability doubles for tests. **Never use in production.**

use std::collections::{BTreeMap, BTreeSet};

use stablepay_types::{AccountKeeper, Address, BankKeeper, Coin, ComplianceKeeper, Result, StablepayError};

/// Who holds a balance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Holder {
    Account(Address),
    Module(String),
}

/// Balance book keyed by `(holder, denom)`.
#[derive(Debug, Clone, Default)]
pub struct MemBank {
    balances: BTreeMap<(Holder, String), u128>,
}

impl MemBank {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account out of thin air.
    pub fn fund(&mut self, addr: &Address, amount: &Coin) {
        *self
            .balances
            .entry((Holder::Account(addr.clone()), amount.denom.clone()))
            .or_default() += amount.amount;
    }

    #[must_use]
    pub fn module_balance(&self, module: &str, denom: &str) -> u128 {
        self.get(&Holder::Module(module.to_string()), denom)
    }

    /// Sum over every holder. Transfers never change it.
    #[must_use]
    pub fn total_supply(&self, denom: &str) -> u128 {
        self.balances
            .iter()
            .filter(|((_, d), _)| d == denom)
            .map(|(_, v)| *v)
            .sum()
    }

    fn get(&self, holder: &Holder, denom: &str) -> u128 {
        self.balances
            .get(&(holder.clone(), denom.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn transfer(&mut self, from: Holder, to: Holder, amount: &Coin) -> Result<()> {
        let available = self.get(&from, &amount.denom);
        let remaining = available
            .checked_sub(amount.amount)
            .ok_or(StablepayError::InsufficientFunds {
                needed: amount.amount,
                available,
            })?;
        let credited = self
            .get(&to, &amount.denom)
            .checked_add(amount.amount)
            .ok_or(StablepayError::AmountOverflow)?;
        self.balances.insert((from, amount.denom.clone()), remaining);
        self.balances.insert((to, amount.denom.clone()), credited);
        Ok(())
    }
}

impl BankKeeper for MemBank {
    fn balance(&self, addr: &Address, denom: &str) -> Coin {
        Coin::new(denom, self.get(&Holder::Account(addr.clone()), denom))
    }

    fn send_coins(&mut self, from: &Address, to: &Address, amount: &Coin) -> Result<()> {
        self.transfer(Holder::Account(from.clone()), Holder::Account(to.clone()), amount)
    }

    fn send_coins_from_account_to_module(&mut self, from: &Address, module: &str, amount: &Coin) -> Result<()> {
        self.transfer(Holder::Account(from.clone()), Holder::Module(module.to_string()), amount)
    }

    fn send_coins_from_module_to_account(&mut self, module: &str, to: &Address, amount: &Coin) -> Result<()> {
        self.transfer(Holder::Module(module.to_string()), Holder::Account(to.clone()), amount)
    }

    fn send_coins_from_module_to_module(&mut self, from_module: &str, to_module: &str, amount: &Coin) -> Result<()> {
        self.transfer(
            Holder::Module(from_module.to_string()),
            Holder::Module(to_module.to_string()),
            amount,
        )
    }

    fn mint_coins(&mut self, module: &str, amount: &Coin) -> Result<()> {
        let entry = self
            .balances
            .entry((Holder::Module(module.to_string()), amount.denom.clone()))
            .or_default();
        *entry = entry.checked_add(amount.amount).ok_or(StablepayError::AmountOverflow)?;
        Ok(())
    }

    fn burn_coins(&mut self, module: &str, amount: &Coin) -> Result<()> {
        let holder = Holder::Module(module.to_string());
        let available = self.get(&holder, &amount.denom);
        let remaining = available
            .checked_sub(amount.amount)
            .ok_or(StablepayError::InsufficientFunds {
                needed: amount.amount,
                available,
            })?;
        self.balances.insert((holder, amount.denom.clone()), remaining);
        Ok(())
    }
}

/// Block list. Everyone not on it passes.
#[derive(Debug, Clone, Default)]
pub struct StaticCompliance {
    blocked: BTreeSet<Address>,
}

impl StaticCompliance {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&mut self, addr: &Address) {
        self.blocked.insert(addr.clone());
    }

    pub fn unblock(&mut self, addr: &Address) {
        self.blocked.remove(addr);
    }
}

impl ComplianceKeeper for StaticCompliance {
    fn assert_compliant(&self, addr: &Address) -> Result<()> {
        if self.blocked.contains(addr) {
            return Err(StablepayError::ComplianceCheckFailed {
                address: addr.to_string(),
                reason: "address is on the block list".into(),
            });
        }
        Ok(())
    }
}

/// Public key registry.
#[derive(Debug, Clone, Default)]
pub struct MemAccounts {
    keys: BTreeMap<Address, Vec<u8>>,
}

impl MemAccounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, addr: &Address, pub_key: &[u8]) {
        self.keys.insert(addr.clone(), pub_key.to_vec());
    }
}

impl AccountKeeper for MemAccounts {
    fn pub_key(&self, addr: &Address) -> Option<Vec<u8>> {
        self.keys.get(addr).cloned()
    }
}
