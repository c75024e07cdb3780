use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

pub const INITIAL_COINS: i64 = 1000;

/// Catalog of purchasable items and their prices in coins.
pub const ITEMS: &[(&str, i64)] = &[
    ("t-shirt", 80),
    ("cup", 20),
    ("book", 50),
    ("pen", 10),
    ("powerbank", 200),
    ("hoody", 300),
    ("umbrella", 200),
    ("socks", 10),
    ("wallet", 50),
    ("pink-hoody", 500),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShopError {
    InvalidCredentials,
    UnknownItem(String),
    UnknownRecipient(String),
    InvalidAmount,
    InsufficientFunds,
}

impl std::fmt::Display for ShopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCredentials => f.write_str("invalid login or password"),
            Self::UnknownItem(item) => write!(f, "unknown item: {item}"),
            Self::UnknownRecipient(user) => write!(f, "recipient not found: {user}"),
            Self::InvalidAmount => f.write_str("amount must be positive"),
            Self::InsufficientFunds => f.write_str("insufficient funds"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryItem {
    #[serde(rename = "type")]
    pub item: String,
    pub quantity: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Received {
    #[serde(rename = "fromUser")]
    pub from_user: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Sent {
    #[serde(rename = "toUser")]
    pub to_user: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CoinHistory {
    pub received: Vec<Received>,
    pub sent: Vec<Sent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub coins: i64,
    pub inventory: Vec<InventoryItem>,
    pub coin_history: CoinHistory,
}

#[derive(Debug)]
struct Account {
    password: String,
    coins: i64,
    inventory: BTreeMap<String, u64>,
    history: CoinHistory,
    /// Issued on first login and reused afterwards.
    token: Option<String>,
}

/// In-memory users, balances, purchases and transfers.
#[derive(Debug, Default)]
pub struct Shop {
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, String>,
    next_token: u64,
    initial_coins: i64,
}

impl Shop {
    pub fn new(initial_coins: i64) -> Self {
        Self {
            initial_coins,
            ..Self::default()
        }
    }

    /// Logs a user in, registering unknown usernames on first sight. Every
    /// login of the same user returns the same token.
    pub fn authenticate(&mut self, username: &str, password: &str) -> Result<String, ShopError> {
        let initial_coins = self.initial_coins;
        let account = self
            .accounts
            .entry(username.to_string())
            .or_insert_with(|| Account {
                password: password.to_string(),
                coins: initial_coins,
                inventory: BTreeMap::new(),
                history: CoinHistory::default(),
                token: None,
            });
        if account.password != password {
            return Err(ShopError::InvalidCredentials);
        }
        if let Some(token) = &account.token {
            return Ok(token.clone());
        }

        self.next_token += 1;
        let token = format!("tok-{:08x}-{}", self.next_token, username.len());
        account.token = Some(token.clone());
        self.tokens.insert(token.clone(), username.to_string());
        Ok(token)
    }

    pub fn tokens_issued(&self) -> usize {
        self.tokens.len()
    }

    pub fn user_for_token(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }

    pub fn info(&self, username: &str) -> Option<UserInfo> {
        let acc = self.accounts.get(username)?;
        Some(UserInfo {
            coins: acc.coins,
            inventory: acc
                .inventory
                .iter()
                .map(|(item, quantity)| InventoryItem {
                    item: item.clone(),
                    quantity: *quantity,
                })
                .collect(),
            coin_history: acc.history.clone(),
        })
    }

    pub fn buy(&mut self, username: &str, item: &str) -> Result<(), ShopError> {
        let price = ITEMS
            .iter()
            .find(|(name, _)| *name == item)
            .map(|(_, price)| *price)
            .ok_or_else(|| ShopError::UnknownItem(item.to_string()))?;

        let acc = self
            .accounts
            .get_mut(username)
            .ok_or(ShopError::InvalidCredentials)?;
        if acc.coins < price {
            return Err(ShopError::InsufficientFunds);
        }
        acc.coins -= price;
        *acc.inventory.entry(item.to_string()).or_insert(0) += 1;
        Ok(())
    }

    pub fn send_coin(&mut self, from: &str, to: &str, amount: i64) -> Result<(), ShopError> {
        if amount <= 0 {
            return Err(ShopError::InvalidAmount);
        }
        if !self.accounts.contains_key(to) {
            return Err(ShopError::UnknownRecipient(to.to_string()));
        }

        let sender = self
            .accounts
            .get_mut(from)
            .ok_or(ShopError::InvalidCredentials)?;
        if sender.coins < amount {
            return Err(ShopError::InsufficientFunds);
        }
        sender.coins -= amount;
        sender.history.sent.push(Sent {
            to_user: to.to_string(),
            amount,
        });

        if let Some(recipient) = self.accounts.get_mut(to) {
            recipient.coins += amount;
            recipient.history.received.push(Received {
                from_user: from.to_string(),
                amount,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_registers_then_checks_password() {
        let mut shop = Shop::new(INITIAL_COINS);
        let token = shop
            .authenticate("alice", "pw")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(shop.user_for_token(&token).as_deref(), Some("alice"));
        assert_eq!(
            shop.authenticate("alice", "wrong"),
            Err(ShopError::InvalidCredentials)
        );
    }

    #[test]
    fn repeated_logins_reuse_one_token() {
        let mut shop = Shop::new(INITIAL_COINS);
        let first = shop.authenticate("bob", "pw").unwrap_or_else(|e| panic!("{e}"));
        for _ in 0..1000 {
            let again = shop.authenticate("bob", "pw").unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(again, first);
        }
        shop.authenticate("carol", "pw").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(shop.tokens_issued(), 2);
    }

    #[test]
    fn buy_and_send_move_coins() {
        let mut shop = Shop::new(100);
        shop.authenticate("a", "x").unwrap_or_else(|e| panic!("{e}"));
        shop.authenticate("b", "y").unwrap_or_else(|e| panic!("{e}"));

        shop.buy("a", "pen").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            shop.buy("a", "pink-hoody"),
            Err(ShopError::InsufficientFunds)
        );
        assert!(matches!(shop.buy("a", "yacht"), Err(ShopError::UnknownItem(_))));

        shop.send_coin("a", "b", 5).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(shop.send_coin("a", "b", 0), Err(ShopError::InvalidAmount));
        assert!(matches!(
            shop.send_coin("a", "nobody", 1),
            Err(ShopError::UnknownRecipient(_))
        ));

        let a = shop.info("a").unwrap_or_else(|| panic!("missing a"));
        assert_eq!(a.coins, 85);
        assert_eq!(a.inventory.len(), 1);
        assert_eq!(a.coin_history.sent.len(), 1);

        let b = shop.info("b").unwrap_or_else(|| panic!("missing b"));
        assert_eq!(b.coins, 105);
        assert_eq!(b.coin_history.received[0].from_user, "a");
    }
}
