/*!
 * Type definitions for the escrow marketplace contract.
 *
 * This module defines the data model shared by the listing store, the offer
 * store and the escrow engine, together with the contract error codes and the
 * event symbols consumed by off-chain indexers.
 */

use soroban_sdk::{contracterror, contracttype, Address, Symbol};

// ================================================================================================
// CORE DATA STRUCTURES
// ================================================================================================

/// A seller's posted item, backed by platform-token collateral.
///
/// The deposit is held in escrow by the contract and is consumed to cover
/// affiliate commissions when offers against this listing are accepted. The
/// arbitrator is the only identity allowed to withdraw the listing and
/// redirect what remains of its deposit.
///
/// A listing record is removed from storage when it is withdrawn; its id is
/// never reused. Offers made against the listing survive its removal and must
/// be withdrawn separately.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Listing {
    /// The identity that created and owns the listing.
    pub seller: Address,

    /// Platform-token collateral currently held for this listing.
    /// Decremented by the commission amount each time an offer is accepted,
    /// credited back when a ruling declines to pay the affiliate.
    pub deposit: i128,

    /// The identity authorized to withdraw the listing and its deposit.
    pub arbitrator: Address,
}

/// A buyer's escrowed bid against a listing.
///
/// The offer carries its own currency, value and arbitrator, all fixed at
/// creation so that they survive later mutation or withdrawal of the listing.
///
/// # Lifecycle
/// - `Created`: funds escrowed, waiting for the seller.
/// - `Accepted`: seller accepted; commission reserved out of the listing
///   deposit; the finalize window is running.
/// - `Disputed`: one party escalated before the deadline; only the offer's
///   arbitrator can settle.
///
/// Withdrawal, finalization and rulings remove the record from storage
/// entirely; a removed offer can never satisfy the guards of any further
/// transition.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Offer {
    /// The identity that created the offer and escrowed its value.
    pub buyer: Address,

    /// The identity empowered to rule on this offer once disputed.
    pub arbitrator: Address,

    /// Referral identity eligible for the commission, subject to the
    /// affiliate whitelist. `None` means no affiliate and zero commission.
    pub affiliate: Option<Address>,

    /// Total funds currently escrowed for this offer, in `currency` units.
    pub value: i128,

    /// Platform-token amount reserved for the affiliate, debited from the
    /// listing deposit at acceptance time.
    pub commission: i128,

    /// Portion of `value` earmarked to return to the buyer at settlement.
    /// Settable by the seller while accepted, or by the arbitration ruling.
    pub refund: i128,

    /// Asset the offer is denominated in; copied at creation.
    pub currency: Currency,

    /// Settlement deadline. Before acceptance this may hold a relative
    /// duration in seconds; acceptance converts it to an absolute ledger
    /// timestamp (see `RELATIVE_FINALIZE_THRESHOLD` in the contract).
    pub finalizes: u64,

    /// Current position in the offer lifecycle.
    pub status: OfferStatus,
}

// ================================================================================================
// ENUMERATIONS
// ================================================================================================

/// Position of an offer in its lifecycle.
///
/// Transitions only ever advance: `Created` -> `Accepted` -> `Disputed`, or
/// exit directly from `Created`/`Accepted` to terminal. The terminal state is
/// represented by removal from storage rather than a stored variant, so stale
/// zero-valued records can never pass a status guard.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OfferStatus {
    /// Funds escrowed, awaiting seller acceptance. Buyer or seller may
    /// withdraw, refunding the buyer in full.
    Created,

    /// Seller accepted; commission reserved. Finalize and dispute are gated
    /// by the `finalizes` deadline.
    Accepted,

    /// Under arbitration. Only `execute_ruling` by the offer's arbitrator
    /// can settle it.
    Disputed,
}

/// The asset an offer is denominated in, fixed at offer creation.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Currency {
    /// The chain's native asset, resolved through the native-asset contract
    /// address configured at initialization.
    Native,

    /// A specific fungible token contract.
    Token(Address),
}

// ================================================================================================
// ERROR DEFINITIONS
// ================================================================================================

/// Contract error codes.
///
/// Every failure aborts the current call with no state mutation and no event
/// emission; callers retry idempotently where appropriate. Codes are stable
/// for programmatic handling by clients.
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    /// The acting identity is not allowed to perform this action on this
    /// record (wrong seller, buyer, arbitrator or non-whitelisted affiliate).
    PermissionDenied = 1,

    /// The action is not permitted from the record's current status, the
    /// deadline guard was violated, or the record no longer exists.
    InvalidState = 2,

    /// Malformed input: negative amount, refund exceeding value, or a
    /// commission without an affiliate to pay it to.
    InvalidArgument = 3,

    /// An asset movement reported failure; the whole operation is aborted.
    TransferFailed = 4,

    /// The contract is paused and state-changing operations are disabled.
    ContractPaused = 5,
}

// ================================================================================================
// EVENT CONSTANTS
// ================================================================================================
// One event per successful state transition. Topics carry the symbol and the
// acting identity; the data payload carries the record ids, the opaque IPFS
// data reference and, for rulings, the ruling bitmask. The engine never reads
// these back; they exist for the off-chain search indexer and notifications.

/// A listing was created. Data: (listing_id, ipfs_hash).
pub const LISTING_CREATED: Symbol = Symbol::short("lst_crt");

/// A listing's data reference or deposit was updated. Data: (listing_id, ipfs_hash).
pub const LISTING_UPDATED: Symbol = Symbol::short("lst_upd");

/// A listing was withdrawn by its arbitrator. Data: (listing_id, target, ipfs_hash).
pub const LISTING_WITHDRAWN: Symbol = Symbol::short("lst_wdrn");

/// An offer was created. Data: (listing_id, offer_id, ipfs_hash).
pub const OFFER_CREATED: Symbol = Symbol::short("ofr_crt");

/// An offer was accepted by the seller. Data: (listing_id, offer_id, ipfs_hash).
pub const OFFER_ACCEPTED: Symbol = Symbol::short("ofr_acc");

/// The buyer added funds to an accepted offer. Data: (listing_id, offer_id, ipfs_hash).
pub const OFFER_FUNDED: Symbol = Symbol::short("ofr_fund");

/// An offer settled through finalization. Data: (listing_id, offer_id, ipfs_hash).
pub const OFFER_FINALIZED: Symbol = Symbol::short("ofr_fin");

/// An offer was withdrawn and the buyer refunded. Data: (listing_id, offer_id, ipfs_hash).
pub const OFFER_WITHDRAWN: Symbol = Symbol::short("ofr_wdrn");

/// An offer was disputed. Data: (listing_id, offer_id, ipfs_hash).
pub const OFFER_DISPUTED: Symbol = Symbol::short("ofr_disp");

/// A disputed offer was settled by ruling. Data: (listing_id, offer_id, ipfs_hash, ruling).
pub const OFFER_RULING: Symbol = Symbol::short("ofr_rule");

/// The seller updated an offer's refund. Data: (listing_id, offer_id, ipfs_hash).
pub const OFFER_DATA: Symbol = Symbol::short("ofr_data");

/// Contract ownership moved. Data: new owner.
pub const OWNER_UPDATED: Symbol = Symbol::short("own_upd");

/// The platform token address changed. Data: new token.
pub const TOKEN_UPDATED: Symbol = Symbol::short("tok_upd");

/// An affiliate was added to the whitelist. Data: affiliate.
pub const AFFILIATE_ADDED: Symbol = Symbol::short("aff_add");

/// An affiliate was removed from the whitelist. Data: affiliate.
pub const AFFILIATE_REMOVED: Symbol = Symbol::short("aff_rem");
