use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

pub type TableId = u64;
pub type Round = u64;
pub type UnixSeconds = i64;
pub type CardValue = u8;
pub type Chips = u128;

pub const BOARD_SIZE: usize = 5;

// ---- Identities ------------------------------------------------------------------------------

/// Account address, normalised to lower case so lookups never depend on checksum casing.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

/// The account acting on behalf of the local player.
///
/// `signer` submits requests; `principal` owns the seat. They differ when the
/// client signs with a delegated session key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity {
    pub signer: Address,
    pub principal: Address,
    pub contract: Address,
}

impl ClientIdentity {
    pub fn direct(account: Address, contract: Address) -> Self {
        Self {
            signer: account.clone(),
            principal: account,
            contract,
        }
    }

    pub fn delegated(signer: Address, principal: Address, contract: Address) -> Self {
        Self {
            signer,
            principal,
            contract,
        }
    }

    pub fn is_delegated(&self) -> bool {
        self.signer != self.principal
    }
}

// ---- Table state -----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Waiting,
    Playing,
    Finished,
}

/// Authoritative table view. Replaced wholesale on every refresh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub table_id: TableId,
    pub game_state: GameState,
    pub round: Round,
    pub dealer_index: u8,
    pub turn_start_time: Option<UnixSeconds>,
    pub action_timeout_seconds: Option<u64>,
    pub min_buy_in: Chips,
    pub max_players: u8,
    pub num_players: u8,
    pub is_seated: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerBettingState {
    pub chips: Chips,
    pub current_bet: Chips,
    pub has_folded: bool,
    pub is_current_player: bool,
}

pub type PlayerStates = BTreeMap<Address, PlayerBettingState>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BettingInfo {
    pub pot: Chips,
    pub current_bet: Chips,
    pub current_player: Option<Address>,
}

// ---- Cards -----------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Street {
    PreFlop = 0,
    Flop = 1,
    Turn = 2,
    River = 3,
}

impl Street {
    /// Number of board cards that are public once this street is reached.
    pub fn board_cards(self) -> usize {
        match self {
            Street::PreFlop => 0,
            Street::Flop => 3,
            Street::Turn => 4,
            Street::River => 5,
        }
    }
}

impl TryFrom<u8> for Street {
    type Error = BoardError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Street::PreFlop),
            1 => Ok(Street::Flop),
            2 => Ok(Street::Turn),
            3 => Ok(Street::River),
            other => Err(BoardError::UnknownStreet(other)),
        }
    }
}

impl From<Street> for u8 {
    fn from(street: Street) -> Self {
        street as u8
    }
}

/// Opaque reference to an encrypted value held by the ledger.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CardHandle(String);

impl CardHandle {
    pub fn parse(raw: &str) -> Result<Self, hex::FromHexError> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(digits)?;
        Ok(Self(format!("0x{}", hex::encode(bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CardHandle {
    type Error = hex::FromHexError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<CardHandle> for String {
    fn from(handle: CardHandle) -> Self {
        handle.0
    }
}

impl fmt::Debug for CardHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CardHandle({})", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityCardState {
    pub handles: Vec<CardHandle>,
    pub street: Street,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("unknown street index {0}")]
    UnknownStreet(u8),
    #[error("board must hold 0 or {BOARD_SIZE} slots, got {0}")]
    BadLength(usize),
    #[error("{0} revealed board cards is not a valid street boundary")]
    PartialGroup(usize),
    #[error("board slot {0} is revealed before an earlier slot")]
    Gap(usize),
}

/// Plaintext board. Holds either no slots at all or exactly five, of which
/// a prefix of 0, 3, 4 or 5 is revealed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Option<CardValue>>", into = "Vec<Option<CardValue>>")]
pub struct DecryptedCommunityCards {
    slots: Vec<Option<CardValue>>,
}

impl DecryptedCommunityCards {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: [Option<CardValue>; BOARD_SIZE]) -> Result<Self, BoardError> {
        if let Some(gap) = slots
            .windows(2)
            .position(|pair| pair[0].is_none() && pair[1].is_some())
        {
            return Err(BoardError::Gap(gap + 1));
        }
        let revealed = slots.iter().filter(|slot| slot.is_some()).count();
        match revealed {
            0 | 3 | 4 | 5 => Ok(Self {
                slots: slots.to_vec(),
            }),
            other => Err(BoardError::PartialGroup(other)),
        }
    }

    pub fn revealed_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn as_slice(&self) -> &[Option<CardValue>] {
        &self.slots
    }
}

impl TryFrom<Vec<Option<CardValue>>> for DecryptedCommunityCards {
    type Error = BoardError;

    fn try_from(slots: Vec<Option<CardValue>>) -> Result<Self, Self::Error> {
        if slots.is_empty() {
            return Ok(Self::empty());
        }
        let fixed: [Option<CardValue>; BOARD_SIZE] = slots
            .as_slice()
            .try_into()
            .map_err(|_| BoardError::BadLength(slots.len()))?;
        Self::from_slots(fixed)
    }
}

impl From<DecryptedCommunityCards> for Vec<Option<CardValue>> {
    fn from(board: DecryptedCommunityCards) -> Self {
        board.slots
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoleCards {
    pub card1: CardValue,
    pub card2: CardValue,
}

/// Plaintext hole cards for the current hand, keyed by player.
pub type RevealedCards = BTreeMap<Address, HoleCards>;

/// Frozen view of a finished hand, captured once at the Playing → Finished edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowdownCache {
    pub round: Round,
    pub revealed_cards: RevealedCards,
    pub community_cards: DecryptedCommunityCards,
    pub captured_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub label: String,
}

// ---- Decryption credentials ------------------------------------------------------------------

/// Time-bounded credential letting `user_address` request plaintext for handles
/// owned by `contract_addresses`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionSignature {
    pub public_key: String,
    pub private_key: String,
    pub signature: String,
    pub contract_addresses: Vec<Address>,
    pub user_address: Address,
    pub start_timestamp: UnixSeconds,
    pub duration_days: u32,
}

impl DecryptionSignature {
    pub fn expires_at(&self) -> UnixSeconds {
        self.start_timestamp + i64::from(self.duration_days) * 86_400
    }

    pub fn covers(&self, identity: &Address, contract: &Address, now: UnixSeconds) -> bool {
        &self.user_address == identity
            && self.contract_addresses.iter().any(|c| c == contract)
            && now >= self.start_timestamp
            && now < self.expires_at()
    }
}

impl fmt::Debug for DecryptionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionSignature")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("user_address", &self.user_address)
            .field("contract_addresses", &self.contract_addresses)
            .field("start_timestamp", &self.start_timestamp)
            .field("duration_days", &self.duration_days)
            .finish()
    }
}

impl Drop for DecryptionSignature {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_compare_case_insensitively() {
        let checksummed = Address::new("0xAbCdEF0123");
        let lower: Address = serde_json::from_str("\"0xabcdef0123\"").unwrap();
        assert_eq!(checksummed, lower);
        assert_eq!(checksummed.as_str(), "0xabcdef0123");
    }

    #[test]
    fn board_accepts_only_street_boundaries() {
        let flop = DecryptedCommunityCards::from_slots([Some(5), Some(17), Some(22), None, None])
            .unwrap();
        assert_eq!(flop.revealed_count(), 3);
        assert_eq!(flop.as_slice().len(), BOARD_SIZE);

        assert_eq!(
            DecryptedCommunityCards::from_slots([Some(5), Some(17), None, None, None]),
            Err(BoardError::PartialGroup(2))
        );
        assert_eq!(
            DecryptedCommunityCards::from_slots([Some(5), None, Some(22), Some(1), None]),
            Err(BoardError::Gap(2))
        );
    }

    #[test]
    fn board_deserialises_empty_or_five_slots() {
        let empty: DecryptedCommunityCards = serde_json::from_str("[]").unwrap();
        assert!(empty.is_empty());
        let short: Result<DecryptedCommunityCards, _> = serde_json::from_str("[1,2,3]");
        assert!(short.is_err());
    }

    #[test]
    fn card_handles_normalise_hex() {
        let handle = CardHandle::parse("0xAA").unwrap();
        assert_eq!(handle.as_str(), "0xaa");
        assert!(CardHandle::parse("0xZZ").is_err());
    }

    #[test]
    fn signature_scope_and_window() {
        let user = Address::new("0x01");
        let contract = Address::new("0xc0");
        let signature = DecryptionSignature {
            public_key: "pk".into(),
            private_key: "sk".into(),
            signature: "sig".into(),
            contract_addresses: vec![contract.clone()],
            user_address: user.clone(),
            start_timestamp: 1_000,
            duration_days: 1,
        };
        assert!(signature.covers(&user, &contract, 1_000));
        assert!(!signature.covers(&user, &contract, 1_000 + 86_400));
        assert!(!signature.covers(&Address::new("0x02"), &contract, 1_500));
        assert!(!format!("{signature:?}").contains("sk"));
    }
}
