//! The signing wallet a level acts through

use ctf_common::{crypto::SigningKey, Address, KeyHash, NetworkId};

/// A signing key and the enterprise address it controls
#[derive(Debug, Clone)]
pub struct Wallet {
    key: SigningKey,
    address: Address,
}

impl Wallet {
    pub fn new(key: SigningKey, network: NetworkId) -> Self {
        let address = Address::from_key_hash(network, key.key_hash());
        Self { key, address }
    }

    /// A fresh random wallet
    pub fn generate(network: NetworkId) -> Self {
        Self::new(SigningKey::generate(), network)
    }

    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn key_hash(&self) -> KeyHash {
        self.key.key_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_keyed_by_payment_hash() {
        let wallet = Wallet::new(SigningKey::from_seed([1; 32]), NetworkId::Testnet);
        assert_eq!(wallet.address().payment_key_hash(), Some(wallet.key_hash()));
        assert!(wallet.address().to_bech32().unwrap().starts_with("addr_test1"));
    }

    #[test]
    fn generated_wallets_differ() {
        let a = Wallet::generate(NetworkId::Testnet);
        let b = Wallet::generate(NetworkId::Testnet);
        assert_ne!(a.key_hash(), b.key_hash());
    }
}
