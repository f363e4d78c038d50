// This file implements the account-style transaction: a signed map of output balances
// A transfer says "my remaining balance is X and recipient R receives Y", and the sum of
// the outputs has to match what the input declares. Rewards are minted with a single output.

use crate::core::monetary::{block_subsidy, Amount};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, ecdsa_p256_sha256_sign_verify, hex_decode};
use crate::wallet::{address_from_public_key, validate_address, Wallet};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Address → amount. Sorted so the signed encoding is canonical.
pub type OutputMap = BTreeMap<String, Amount>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    timestamp: i64,
    amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fee: Option<Amount>,
    address: String,
    public_key: String,
    signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    // Only set on reward inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recipient: Option<String>,
}

impl TransactionInput {
    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_amount(&self) -> Amount {
        self.amount
    }

    pub fn get_fee(&self) -> Option<Amount> {
        self.fee
    }

    pub fn get_address(&self) -> &str {
        self.address.as_str()
    }

    pub fn get_public_key(&self) -> &str {
        self.public_key.as_str()
    }

    pub fn get_signature(&self) -> &str {
        self.signature.as_str()
    }

    pub fn get_message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn get_recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    id: String,
    input: TransactionInput,
    output: OutputMap,
}

impl Transaction {
    /// Builds and signs a transfer of `amount` (plus an optional miner `fee`) from the
    /// wallet's address to `recipient`, given the sender's currently spendable `balance`.
    pub fn create_transfer(
        wallet: &Wallet,
        recipient: &str,
        amount: Amount,
        balance: Amount,
        fee: Option<Amount>,
        message: Option<String>,
    ) -> Result<Transaction> {
        let sender = wallet.get_address();
        check_transfer_target(&sender, recipient, amount)?;

        let fee_value = fee.unwrap_or_default();
        let total = checked_total(amount, fee_value)?;
        let change = balance
            .checked_sub(total)
            .ok_or(BlockchainError::InsufficientFunds {
                required: total,
                available: balance,
            })?;

        let mut output = OutputMap::new();
        output.insert(sender.clone(), change);
        output.insert(recipient.to_string(), amount);

        let input = TransactionInput {
            timestamp: current_timestamp()?,
            // balance - fee == change + amount
            amount: change.saturating_add(amount),
            fee,
            address: sender,
            public_key: wallet.get_public_key_hex(),
            signature: wallet.sign(&signing_payload(&output)?)?,
            message,
            recipient: None,
        };

        Ok(Transaction {
            id: Uuid::new_v4().to_string(),
            input,
            output,
        })
    }

    /// Adds a further payment to this unconfirmed transaction, spending from the
    /// sender's remaining output, and re-signs it with a fresh timestamp.
    pub fn update(
        &mut self,
        wallet: &Wallet,
        recipient: &str,
        amount: Amount,
        fee: Option<Amount>,
        message: Option<String>,
    ) -> Result<()> {
        let sender = wallet.get_address();
        if self.is_reward() || sender != self.input.address {
            return Err(BlockchainError::Validation(format!(
                "Transaction {} can only be updated by its sender",
                self.id
            )));
        }
        check_transfer_target(&sender, recipient, amount)?;

        let fee_value = fee.unwrap_or_default();
        let total = checked_total(amount, fee_value)?;
        let remaining = self.output.get(&sender).copied().unwrap_or_default();
        let change = remaining
            .checked_sub(total)
            .ok_or(BlockchainError::InsufficientFunds {
                required: total,
                available: remaining,
            })?;

        let received = self
            .output
            .get(recipient)
            .copied()
            .unwrap_or_default()
            .checked_add(amount)
            .ok_or_else(|| BlockchainError::Validation("Output amount overflow".to_string()))?;
        let declared = self.input.amount.checked_sub(fee_value).ok_or_else(|| {
            BlockchainError::Validation("Fee exceeds the declared input amount".to_string())
        })?;

        let mut output = self.output.clone();
        output.insert(sender, change);
        output.insert(recipient.to_string(), received);

        // Strictly later, so peers treat the update as a supersession and not a duplicate
        let timestamp = current_timestamp()?.max(self.input.timestamp + 1);

        self.input.fee = match (self.input.fee, fee) {
            (Some(old), Some(extra)) => Some(old.saturating_add(extra)),
            (old, extra) => old.or(extra),
        };
        self.input.amount = declared;
        self.input.timestamp = timestamp;
        self.input.signature = wallet.sign(&signing_payload(&output)?)?;
        if message.is_some() {
            self.input.message = message;
        }
        self.output = output;
        Ok(())
    }

    /// Checks conservation, output addresses, the key-address binding and the signature.
    /// Never fails loudly: every rejection is logged and reported as `false`.
    pub fn is_valid(&self) -> bool {
        match self.check() {
            Ok(()) => true,
            Err(e) => {
                warn!("Invalid transaction {}: {e}", self.id);
                false
            }
        }
    }

    fn check(&self) -> Result<()> {
        if self.is_reward() {
            return Err(BlockchainError::Validation(
                "reward transactions carry no spender signature".to_string(),
            ));
        }

        let output_total = self
            .output
            .values()
            .try_fold(Amount::ZERO, |acc, value| acc.checked_add(*value))
            .ok_or_else(|| BlockchainError::Validation("output total overflows".to_string()))?;
        if output_total != self.input.amount {
            return Err(BlockchainError::Validation(format!(
                "outputs total {output_total} but input declares {}",
                self.input.amount
            )));
        }

        if let Some(address) = self.output.keys().find(|a| !validate_address(a)) {
            return Err(BlockchainError::InvalidAddress(address.clone()));
        }

        let public_key = hex_decode(&self.input.public_key)?;
        if address_from_public_key(&public_key) != self.input.address {
            return Err(BlockchainError::Validation(format!(
                "address {} does not belong to the signing key",
                self.input.address
            )));
        }

        let signature = hex_decode(&self.input.signature)?;
        if !ecdsa_p256_sha256_sign_verify(&public_key, &signature, &signing_payload(&self.output)?)
        {
            return Err(BlockchainError::Validation(format!(
                "invalid signature from {}",
                self.input.address
            )));
        }
        Ok(())
    }

    /// Mints the block producer's reward: subsidy at `height` plus the collected fees
    pub fn new_reward(
        miner: &str,
        height: u64,
        fee_reward: Amount,
        message: Option<String>,
    ) -> Result<Transaction> {
        if !validate_address(miner) {
            return Err(BlockchainError::InvalidAddress(miner.to_string()));
        }
        let amount = block_subsidy(height)
            .checked_add(fee_reward)
            .ok_or_else(|| BlockchainError::Validation("Reward amount overflow".to_string()))?;

        let mut output = OutputMap::new();
        output.insert(miner.to_string(), amount);

        Ok(Transaction {
            id: Uuid::new_v4().to_string(),
            input: TransactionInput {
                timestamp: current_timestamp()?,
                amount,
                fee: None,
                address: String::new(),
                public_key: String::new(),
                signature: String::new(),
                message,
                recipient: Some(miner.to_string()),
            },
            output,
        })
    }

    /// A transaction with exactly one output entry is a minted reward
    pub fn is_reward(&self) -> bool {
        self.output.len() == 1
    }

    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    pub fn get_input(&self) -> &TransactionInput {
        &self.input
    }

    pub fn get_output(&self) -> &OutputMap {
        &self.output
    }

    pub fn get_fee(&self) -> Amount {
        self.input.fee.unwrap_or_default()
    }

    /// Total paid out by the single output of a reward, zero otherwise
    pub fn get_reward_amount(&self) -> Amount {
        if self.is_reward() {
            self.output.values().copied().sum()
        } else {
            Amount::ZERO
        }
    }
}

fn check_transfer_target(sender: &str, recipient: &str, amount: Amount) -> Result<()> {
    if amount.is_zero() {
        return Err(BlockchainError::Validation(
            "Transfer amount must be positive".to_string(),
        ));
    }
    if !validate_address(recipient) {
        return Err(BlockchainError::InvalidAddress(recipient.to_string()));
    }
    if sender == recipient {
        return Err(BlockchainError::Validation(
            "Sender and recipient must differ".to_string(),
        ));
    }
    Ok(())
}

fn checked_total(amount: Amount, fee: Amount) -> Result<Amount> {
    amount
        .checked_add(fee)
        .ok_or_else(|| BlockchainError::Validation("Amount plus fee overflows".to_string()))
}

/// The signed bytes: the JSON encoding of the output map
fn signing_payload(output: &OutputMap) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(output)?)
}

/// Σ of every output not paid back to the paying address
pub fn transaction_volume(transactions: &[Transaction]) -> Amount {
    transactions
        .iter()
        .flat_map(|tx| {
            tx.output
                .iter()
                .filter(move |(address, _)| address.as_str() != tx.input.address)
                .map(|(_, value)| *value)
        })
        .sum()
}

/// Σ of the fees declared by the non-reward transactions
pub fn total_fee_reward(transactions: &[Transaction]) -> Amount {
    transactions
        .iter()
        .filter(|tx| !tx.is_reward())
        .map(Transaction::get_fee)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coins(n: u64) -> Amount {
        Amount::from_coins(n)
    }

    fn transfer(sender: &Wallet, recipient: &Wallet, amount: u64, fee: u64) -> Transaction {
        Transaction::create_transfer(
            sender,
            &recipient.get_address(),
            coins(amount),
            coins(100),
            Some(coins(fee)),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_create_transfer_output_and_input() {
        let sender = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let tx = transfer(&sender, &recipient, 30, 2);

        assert_eq!(tx.get_output()[&sender.get_address()], coins(68));
        assert_eq!(tx.get_output()[&recipient.get_address()], coins(30));
        assert_eq!(tx.get_input().get_amount(), coins(98));
        assert_eq!(tx.get_fee(), coins(2));
        assert_eq!(tx.get_input().get_address(), sender.get_address());
        assert!(!tx.is_reward());
        assert!(tx.is_valid());
    }

    #[test]
    fn test_create_transfer_insufficient_funds() {
        let sender = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let result = Transaction::create_transfer(
            &sender,
            &recipient.get_address(),
            coins(99),
            coins(100),
            Some(coins(2)),
            None,
        );
        assert_eq!(
            result.unwrap_err(),
            BlockchainError::InsufficientFunds {
                required: coins(101),
                available: coins(100)
            }
        );
    }

    #[test]
    fn test_create_transfer_rejects_bad_targets() {
        let sender = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();

        let zero = Transaction::create_transfer(
            &sender,
            &recipient.get_address(),
            Amount::ZERO,
            coins(10),
            None,
            None,
        );
        assert!(matches!(zero, Err(BlockchainError::Validation(_))));

        let bad = Transaction::create_transfer(&sender, "nope", coins(1), coins(10), None, None);
        assert!(matches!(bad, Err(BlockchainError::InvalidAddress(_))));

        let own = Transaction::create_transfer(
            &sender,
            &sender.get_address(),
            coins(1),
            coins(10),
            None,
            None,
        );
        assert!(matches!(own, Err(BlockchainError::Validation(_))));
    }

    #[test]
    fn test_tampered_output_is_invalid() {
        let sender = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let mut tx = transfer(&sender, &recipient, 30, 0);
        tx.output.insert(recipient.get_address(), coins(31));
        tx.output.insert(sender.get_address(), coins(69));
        // totals still match, signature does not
        assert!(!tx.is_valid());
    }

    #[test]
    fn test_conservation_violation_is_invalid() {
        let sender = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let mut tx = transfer(&sender, &recipient, 30, 0);
        tx.input.amount = coins(1000);
        assert!(!tx.is_valid());
    }

    #[test]
    fn test_foreign_key_is_invalid() {
        let sender = Wallet::new().unwrap();
        let thief = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let mut tx = transfer(&thief, &recipient, 30, 0);
        // claim the sender's address while signing with another key
        let change = tx.output.remove(&thief.get_address()).unwrap();
        tx.output.insert(sender.get_address(), change);
        tx.input.address = sender.get_address();
        tx.input.signature = thief.sign(&signing_payload(&tx.output).unwrap()).unwrap();
        assert!(!tx.is_valid());
    }

    #[test]
    fn test_malformed_hex_is_invalid_not_panic() {
        let sender = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let mut tx = transfer(&sender, &recipient, 1, 0);
        tx.input.public_key = "zz-not-hex".to_string();
        assert!(!tx.is_valid());
    }

    #[test]
    fn test_update_adds_payment_and_resigns() {
        let sender = Wallet::new().unwrap();
        let first = Wallet::new().unwrap();
        let second = Wallet::new().unwrap();
        let mut tx = transfer(&sender, &first, 30, 1);
        let before = tx.get_input().get_timestamp();

        tx.update(&sender, &second.get_address(), coins(10), Some(coins(1)), None)
            .unwrap();

        assert_eq!(tx.get_output()[&sender.get_address()], coins(58));
        assert_eq!(tx.get_output()[&first.get_address()], coins(30));
        assert_eq!(tx.get_output()[&second.get_address()], coins(10));
        assert_eq!(tx.get_fee(), coins(2));
        assert_eq!(tx.get_input().get_amount(), coins(98));
        assert!(tx.get_input().get_timestamp() > before);
        assert!(tx.is_valid());
    }

    #[test]
    fn test_update_same_recipient_accumulates() {
        let sender = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let mut tx = transfer(&sender, &recipient, 30, 0);
        tx.update(&sender, &recipient.get_address(), coins(5), None, None)
            .unwrap();
        assert_eq!(tx.get_output()[&recipient.get_address()], coins(35));
        assert_eq!(tx.get_output().len(), 2);
        assert!(tx.is_valid());
    }

    #[test]
    fn test_update_insufficient_remainder() {
        let sender = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let mut tx = transfer(&sender, &recipient, 90, 0);
        let original = tx.clone();
        let err = tx
            .update(&sender, &recipient.get_address(), coins(11), None, None)
            .unwrap_err();
        assert!(matches!(err, BlockchainError::InsufficientFunds { .. }));
        assert_eq!(tx, original);
    }

    #[test]
    fn test_update_by_other_wallet_rejected() {
        let sender = Wallet::new().unwrap();
        let other = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let mut tx = transfer(&sender, &recipient, 10, 0);
        assert!(tx
            .update(&other, &recipient.get_address(), coins(1), None, None)
            .is_err());
    }

    #[test]
    fn test_reward_transaction() {
        let miner = Wallet::new().unwrap();
        let reward = Transaction::new_reward(&miner.get_address(), 2, coins(3), None).unwrap();

        assert!(reward.is_reward());
        assert_eq!(reward.get_reward_amount(), coins(53));
        assert_eq!(reward.get_input().get_recipient(), Some(miner.get_address().as_str()));
        assert!(!reward.is_valid());
        assert!(Transaction::new_reward("bogus", 2, Amount::ZERO, None).is_err());
    }

    #[test]
    fn test_volume_and_fee_helpers() {
        let sender = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let miner = Wallet::new().unwrap();
        let a = transfer(&sender, &recipient, 30, 2);
        let b = transfer(&recipient, &sender, 5, 1);
        let reward = Transaction::new_reward(&miner.get_address(), 2, coins(3), None).unwrap();
        let txs = vec![a, b, reward];

        // 30 + 5 + the reward output
        assert_eq!(transaction_volume(&txs), coins(88));
        assert_eq!(total_fee_reward(&txs), coins(3));
    }

    #[test]
    fn test_json_shape() {
        let sender = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap();
        let tx = transfer(&sender, &recipient, 1, 0);
        let json = serde_json::to_value(&tx).unwrap();

        assert!(json["input"]["publicKey"].is_string());
        assert_eq!(json["input"]["amount"], "100.00000000");
        assert_eq!(json["input"]["fee"], "0.00000000");
        assert!(json["input"].get("recipient").is_none());

        let back: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
        assert!(back.is_valid());
    }
}
