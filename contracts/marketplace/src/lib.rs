/*!
 * Escrow Marketplace Smart Contract
 *
 * Sellers post listings backed by platform-token collateral, buyers make
 * offers backed by escrowed funds, sellers accept, and funds settle either by
 * mutual finalization or by third-party arbitration after a dispute.
 * Key features:
 * - Offers escrowed in the native asset or any fungible token contract
 * - Affiliate commissions reserved out of the listing deposit at acceptance
 * - Deadline-gated finalization and dispute windows
 * - Arbitration rulings encoded as a two-bit mask (refund / commission)
 * - Event emission on every state transition for off-chain indexing
 *
 * Every exported function runs to completion atomically: a guard failure or a
 * failed asset movement aborts the call with no state mutation and no event.
 */

#![no_std]

mod transfer;
mod types;


use soroban_sdk::{contract, contractimpl, log, token, Address, BytesN, Env, Map, Symbol};

use types::{
    Currency, Error, Listing, Offer, OfferStatus, AFFILIATE_ADDED, AFFILIATE_REMOVED,
    LISTING_CREATED, LISTING_UPDATED, LISTING_WITHDRAWN, OFFER_ACCEPTED, OFFER_CREATED,
    OFFER_DATA, OFFER_DISPUTED, OFFER_FINALIZED, OFFER_FUNDED, OFFER_RULING, OFFER_WITHDRAWN,
    OWNER_UPDATED, TOKEN_UPDATED,
};

#[contract]
pub struct Marketplace;

// Storage keys. Configuration that must survive upgrades lives in persistent
// storage; the record maps and counters live in instance storage.
const OWNER_KEY: Symbol = Symbol::short("OWNER"); // Owner address (persistent)
const TOKEN_KEY: Symbol = Symbol::short("TOKEN"); // Platform token contract (persistent)
pub(crate) const NATIVE_KEY: Symbol = Symbol::short("NATIVE_TK"); // Native asset contract (persistent)
const PAUSED_KEY: Symbol = Symbol::short("PAUSED"); // Pause flag (instance)
const LISTINGS_KEY: Symbol = Symbol::short("LISTINGS"); // Map of listing_id to Listing (instance)
const NEXT_LISTING_ID: Symbol = Symbol::short("NEXT_L_ID"); // Dense listing id counter (instance)
const OFFERS_KEY: Symbol = Symbol::short("OFFERS"); // Map of (listing_id, offer_id) to Offer (instance)
const OFFER_SEQS: Symbol = Symbol::short("OFR_SEQS"); // Per-listing dense offer id counters (instance)
const AFFILIATES_KEY: Symbol = Symbol::short("AFF_WL"); // Affiliate whitelist (instance)

/// Boundary separating relative durations from absolute timestamps in an
/// offer's `finalizes` field. A value below the threshold is a duration in
/// seconds and is converted to `now + finalizes` at acceptance; anything at or
/// above it is already an absolute ledger timestamp. The threshold itself is
/// an epoch timestamp from 2001, far below any plausible deadline.
pub const RELATIVE_FINALIZE_THRESHOLD: u64 = 1_000_000_000;

#[contractimpl]
impl Marketplace {
    /// Initializes the marketplace with its owner and token configuration.
    /// Can only be called once.
    ///
    /// # Arguments
    /// * `owner` - The identity allowed to administer the affiliate whitelist,
    ///   the platform token address and the pause flag
    /// * `token` - The platform token contract; listing deposits and affiliate
    ///   commissions are denominated in it
    /// * `native_token` - The contract implementing the chain's native asset,
    ///   used to settle offers denominated in `Currency::Native`
    ///
    /// Both token addresses are validated by calling `decimals()`, which traps
    /// if the address does not implement the token interface.
    pub fn initialize(
        env: Env,
        owner: Address,
        token: Address,
        native_token: Address,
    ) -> Result<(), Error> {
        if env.storage().persistent().has(&OWNER_KEY) {
            panic!("already initialized");
        }

        let _ = token::Client::new(&env, &token).decimals();
        let _ = token::Client::new(&env, &native_token).decimals();

        env.storage().persistent().set(&OWNER_KEY, &owner);
        env.storage().persistent().set(&TOKEN_KEY, &token);
        env.storage().persistent().set(&NATIVE_KEY, &native_token);

        env.storage().instance().set(&NEXT_LISTING_ID, &0u64);
        env.storage()
            .instance()
            .set(&LISTINGS_KEY, &Map::<u64, Listing>::new(&env));
        env.storage()
            .instance()
            .set(&OFFERS_KEY, &Map::<(u64, u64), Offer>::new(&env));
        env.storage()
            .instance()
            .set(&OFFER_SEQS, &Map::<u64, u64>::new(&env));
        env.storage()
            .instance()
            .set(&AFFILIATES_KEY, &Map::<Address, bool>::new(&env));
        env.storage().instance().set(&PAUSED_KEY, &false);

        Ok(())
    }

    // ================================================================================================
    // INTERNAL HELPERS
    // ================================================================================================

    /// Requires the stored owner to have authorized the current invocation.
    fn _require_owner(env: &Env) -> Result<(), Error> {
        let owner: Address = env.storage().persistent().get(&OWNER_KEY).unwrap();
        owner.require_auth();
        Ok(())
    }

    /// Rejects state-changing operations while the contract is paused.
    fn _require_active(env: &Env) -> Result<(), Error> {
        let paused: bool = env.storage().instance().get(&PAUSED_KEY).unwrap_or(false);
        if paused {
            return Err(Error::ContractPaused);
        }
        Ok(())
    }

    fn _listings(env: &Env) -> Map<u64, Listing> {
        env.storage().instance().get(&LISTINGS_KEY).unwrap()
    }

    fn _offers(env: &Env) -> Map<(u64, u64), Offer> {
        env.storage().instance().get(&OFFERS_KEY).unwrap()
    }

    fn _offer_seqs(env: &Env) -> Map<u64, u64> {
        env.storage().instance().get(&OFFER_SEQS).unwrap()
    }

    fn _platform_token(env: &Env) -> Address {
        env.storage().persistent().get(&TOKEN_KEY).unwrap()
    }

    /// Whether `caller` is a party to the offer: its buyer, or the seller of
    /// the listing if the listing still exists. Each transition's role check
    /// goes through here so the access rules live in one place.
    fn _is_party(caller: &Address, offer: &Offer, listing: &Option<Listing>) -> bool {
        caller == &offer.buyer
            || listing
                .as_ref()
                .map_or(false, |listing| &listing.seller == caller)
    }

    /// Pays the reserved commission to the offer's affiliate, if any. The
    /// commission is always denominated in the platform token.
    fn _pay_commission(env: &Env, offer: &Offer) -> Result<(), Error> {
        if let Some(affiliate) = &offer.affiliate {
            transfer::push(env, &Self::_platform_token(env), affiliate, offer.commission)?;
        }
        Ok(())
    }

    /// Settles an offer in the seller's favour: the buyer receives the
    /// earmarked refund and the seller receives the exact remainder, so the
    /// two payouts always sum to the escrowed value.
    fn _pay_seller(env: &Env, listing: &Listing, offer: &Offer) -> Result<(), Error> {
        let token_addr = transfer::resolve(env, &offer.currency);
        let remainder = offer.value - offer.refund;
        transfer::push(env, &token_addr, &offer.buyer, offer.refund)?;
        transfer::push(env, &token_addr, &listing.seller, remainder)?;
        Ok(())
    }

    /// Returns the full escrowed value to the buyer.
    fn _refund_buyer(env: &Env, offer: &Offer) -> Result<(), Error> {
        let token_addr = transfer::resolve(env, &offer.currency);
        transfer::push(env, &token_addr, &offer.buyer, offer.value)
    }

    // ================================================================================================
    // LISTING STORE
    // ================================================================================================

    /// Creates a new listing, escrowing `deposit` of the platform token from
    /// the seller as collateral for future affiliate commissions.
    ///
    /// # Arguments
    /// * `seller` - The identity creating the listing (must authorize)
    /// * `ipfs_hash` - Opaque reference to the off-chain listing detail
    /// * `deposit` - Platform-token collateral to escrow; may be zero
    /// * `arbitrator` - The identity allowed to withdraw the listing later
    ///
    /// # Returns
    /// The dense, monotonically increasing id assigned to the listing.
    ///
    /// # Errors
    /// - `ContractPaused`: trading is disabled
    /// - `InvalidArgument`: negative deposit
    /// - `TransferFailed`: the deposit could not be pulled from the seller
    pub fn create_listing(
        env: Env,
        seller: Address,
        ipfs_hash: BytesN<32>,
        deposit: i128,
        arbitrator: Address,
    ) -> Result<u64, Error> {
        Self::_require_active(&env)?;
        seller.require_auth();

        if deposit < 0 {
            return Err(Error::InvalidArgument);
        }

        // Pull the collateral before the listing exists; a failed pull leaves
        // no partial state behind.
        transfer::pull(&env, &Self::_platform_token(&env), &seller, deposit)?;

        let listing_id: u64 = env.storage().instance().get(&NEXT_LISTING_ID).unwrap();
        let mut listings = Self::_listings(&env);
        listings.set(
            listing_id,
            Listing {
                seller: seller.clone(),
                deposit,
                arbitrator,
            },
        );
        env.storage().instance().set(&LISTINGS_KEY, &listings);
        env.storage()
            .instance()
            .set(&NEXT_LISTING_ID, &(listing_id + 1));

        env.events()
            .publish((LISTING_CREATED, seller), (listing_id, ipfs_hash));

        Ok(listing_id)
    }

    /// Updates a listing's data reference and optionally adds collateral.
    ///
    /// # Errors
    /// - `InvalidState`: the listing does not exist or was withdrawn
    /// - `PermissionDenied`: caller is not the stored seller
    /// - `InvalidArgument`: negative additional deposit
    /// - `TransferFailed`: the additional deposit could not be pulled
    pub fn update_listing(
        env: Env,
        listing_id: u64,
        seller: Address,
        ipfs_hash: BytesN<32>,
        additional_deposit: i128,
    ) -> Result<(), Error> {
        Self::_require_active(&env)?;
        seller.require_auth();

        let mut listings = Self::_listings(&env);
        let mut listing = listings.get(listing_id).ok_or(Error::InvalidState)?;

        if listing.seller != seller {
            return Err(Error::PermissionDenied);
        }
        if additional_deposit < 0 {
            return Err(Error::InvalidArgument);
        }

        transfer::pull(
            &env,
            &Self::_platform_token(&env),
            &seller,
            additional_deposit,
        )?;
        listing.deposit += additional_deposit;
        listings.set(listing_id, listing);
        env.storage().instance().set(&LISTINGS_KEY, &listings);

        env.events()
            .publish((LISTING_UPDATED, seller), (listing_id, ipfs_hash));

        Ok(())
    }

    /// Withdraws a listing: pushes its entire remaining deposit to `target`
    /// and removes the record. Only the listing's arbitrator may do this.
    ///
    /// Offers made against the listing are untouched; each remains escrowed
    /// until separately withdrawn by its buyer.
    ///
    /// # Errors
    /// - `InvalidState`: the listing does not exist or was already withdrawn
    /// - `PermissionDenied`: caller is not the stored arbitrator
    /// - `TransferFailed`: the deposit payout failed
    pub fn withdraw_listing(
        env: Env,
        listing_id: u64,
        arbitrator: Address,
        target: Address,
        ipfs_hash: BytesN<32>,
    ) -> Result<(), Error> {
        Self::_require_active(&env)?;
        arbitrator.require_auth();

        let mut listings = Self::_listings(&env);
        let listing = listings.get(listing_id).ok_or(Error::InvalidState)?;

        if listing.arbitrator != arbitrator {
            return Err(Error::PermissionDenied);
        }

        transfer::push(&env, &Self::_platform_token(&env), &target, listing.deposit)?;

        listings.remove(listing_id);
        env.storage().instance().set(&LISTINGS_KEY, &listings);

        env.events().publish(
            (LISTING_WITHDRAWN, arbitrator),
            (listing_id, target, ipfs_hash),
        );

        Ok(())
    }

    // ================================================================================================
    // ESCROW ENGINE
    // ================================================================================================

    /// Creates an offer against a listing, escrowing `value` in the offer's
    /// currency from the buyer.
    ///
    /// # Arguments
    /// * `listing_id` - The listing the offer is made against
    /// * `buyer` - The identity making the offer (must authorize)
    /// * `ipfs_hash` - Opaque reference to the off-chain offer detail
    /// * `finalizes` - Settlement deadline; values below
    ///   `RELATIVE_FINALIZE_THRESHOLD` are durations converted to an absolute
    ///   timestamp at acceptance
    /// * `affiliate` - Optional referral identity; must be whitelisted unless
    ///   the allow-all sentinel (the contract's own address) is whitelisted
    /// * `commission` - Platform-token amount reserved for the affiliate at
    ///   acceptance; must be zero when there is no affiliate
    /// * `value` - Funds to escrow, in `currency` units
    /// * `currency` - Native asset or a specific token contract; fixed for the
    ///   offer's lifetime
    /// * `arbitrator` - The identity empowered to rule if the offer is disputed
    ///
    /// # Returns
    /// The offer id, dense per listing.
    ///
    /// # Errors
    /// - `ContractPaused`: trading is disabled
    /// - `PermissionDenied`: affiliate not whitelisted
    /// - `InvalidArgument`: negative amounts, or a commission without an
    ///   affiliate to pay it to
    /// - `TransferFailed`: the escrow pull from the buyer failed
    pub fn create_offer(
        env: Env,
        listing_id: u64,
        buyer: Address,
        ipfs_hash: BytesN<32>,
        finalizes: u64,
        affiliate: Option<Address>,
        commission: i128,
        value: i128,
        currency: Currency,
        arbitrator: Address,
    ) -> Result<u64, Error> {
        Self::_require_active(&env)?;
        buyer.require_auth();
        Self::_make_offer(
            &env, listing_id, &buyer, &ipfs_hash, finalizes, affiliate, commission, value,
            currency, arbitrator,
        )
    }

    /// Creates an offer after first withdrawing one of the buyer's earlier
    /// offers on the same listing, as two sequential sub-transactions within
    /// one atomic call. Used to replace a pending offer without leaving two
    /// escrows alive.
    ///
    /// The withdrawal obeys the same rules as `withdraw_offer`; the creation
    /// obeys the same rules as `create_offer`. If either step fails the whole
    /// call aborts and neither takes effect.
    pub fn create_offer_with_withdrawal(
        env: Env,
        listing_id: u64,
        withdraw_offer_id: u64,
        buyer: Address,
        ipfs_hash: BytesN<32>,
        finalizes: u64,
        affiliate: Option<Address>,
        commission: i128,
        value: i128,
        currency: Currency,
        arbitrator: Address,
    ) -> Result<u64, Error> {
        Self::_require_active(&env)?;
        buyer.require_auth();
        Self::_withdraw_offer(&env, listing_id, withdraw_offer_id, &buyer, &ipfs_hash)?;
        Self::_make_offer(
            &env, listing_id, &buyer, &ipfs_hash, finalizes, affiliate, commission, value,
            currency, arbitrator,
        )
    }

    fn _make_offer(
        env: &Env,
        listing_id: u64,
        buyer: &Address,
        ipfs_hash: &BytesN<32>,
        finalizes: u64,
        affiliate: Option<Address>,
        commission: i128,
        value: i128,
        currency: Currency,
        arbitrator: Address,
    ) -> Result<u64, Error> {
        let affiliates: Map<Address, bool> =
            env.storage().instance().get(&AFFILIATES_KEY).unwrap();
        // The contract's own address doubles as the allow-all sentinel.
        let whitelist_disabled = affiliates
            .get(env.current_contract_address())
            .unwrap_or(false);
        match &affiliate {
            Some(addr) => {
                if !whitelist_disabled && !affiliates.get(addr.clone()).unwrap_or(false) {
                    log!(env, "affiliate not in whitelist");
                    return Err(Error::PermissionDenied);
                }
            }
            // Without an affiliate a nonzero commission could never be paid
            // out and would be stranded in escrow.
            None => {
                if commission != 0 {
                    return Err(Error::InvalidArgument);
                }
            }
        }
        if value < 0 || commission < 0 {
            return Err(Error::InvalidArgument);
        }

        let token_addr = transfer::resolve(env, &currency);
        transfer::pull(env, &token_addr, buyer, value)?;

        let mut seqs = Self::_offer_seqs(env);
        let offer_id = seqs.get(listing_id).unwrap_or(0);
        let mut offers = Self::_offers(env);
        offers.set(
            (listing_id, offer_id),
            Offer {
                buyer: buyer.clone(),
                arbitrator,
                affiliate,
                value,
                commission,
                refund: 0,
                currency,
                finalizes,
                status: OfferStatus::Created,
            },
        );
        seqs.set(listing_id, offer_id + 1);
        env.storage().instance().set(&OFFERS_KEY, &offers);
        env.storage().instance().set(&OFFER_SEQS, &seqs);

        env.events().publish(
            (OFFER_CREATED, buyer.clone()),
            (listing_id, offer_id, ipfs_hash.clone()),
        );

        Ok(offer_id)
    }

    /// Accepts a created offer, reserving its commission out of the listing
    /// deposit and starting the finalize window.
    ///
    /// If the offer's `finalizes` value is below
    /// `RELATIVE_FINALIZE_THRESHOLD` it is a relative duration and becomes
    /// `now + finalizes` here; otherwise it is kept as an absolute timestamp.
    ///
    /// # Errors
    /// - `InvalidState`: offer or listing missing, offer not `Created`, or
    ///   the listing deposit cannot cover the commission
    /// - `PermissionDenied`: caller is not the listing's seller
    pub fn accept_offer(
        env: Env,
        listing_id: u64,
        offer_id: u64,
        seller: Address,
        ipfs_hash: BytesN<32>,
    ) -> Result<(), Error> {
        Self::_require_active(&env)?;
        seller.require_auth();

        let mut offers = Self::_offers(&env);
        let mut offer = offers
            .get((listing_id, offer_id))
            .ok_or(Error::InvalidState)?;
        if offer.status != OfferStatus::Created {
            return Err(Error::InvalidState);
        }

        let mut listings = Self::_listings(&env);
        let mut listing = listings.get(listing_id).ok_or(Error::InvalidState)?;
        if listing.seller != seller {
            return Err(Error::PermissionDenied);
        }

        if listing.deposit < offer.commission {
            log!(
                &env,
                "deposit {} cannot cover commission {}",
                listing.deposit,
                offer.commission
            );
            return Err(Error::InvalidState);
        }

        if offer.finalizes < RELATIVE_FINALIZE_THRESHOLD {
            offer.finalizes = env.ledger().timestamp() + offer.finalizes;
        }

        listing.deposit -= offer.commission;
        offer.status = OfferStatus::Accepted;

        listings.set(listing_id, listing);
        offers.set((listing_id, offer_id), offer);
        env.storage().instance().set(&LISTINGS_KEY, &listings);
        env.storage().instance().set(&OFFERS_KEY, &offers);

        env.events()
            .publish((OFFER_ACCEPTED, seller), (listing_id, offer_id, ipfs_hash));

        Ok(())
    }

    /// Withdraws an offer, refunding its full escrowed value to the buyer.
    ///
    /// Allowed while the offer is `Created` (by buyer or seller), or while
    /// `Accepted` after the listing itself has been withdrawn; in that case
    /// the already-reserved commission is paid out to the affiliate rather
    /// than lost, and then the buyer is refunded.
    ///
    /// # Errors
    /// - `InvalidState`: offer missing, or accepted with the listing still
    ///   alive, or disputed
    /// - `PermissionDenied`: caller is neither the buyer nor the seller
    pub fn withdraw_offer(
        env: Env,
        listing_id: u64,
        offer_id: u64,
        caller: Address,
        ipfs_hash: BytesN<32>,
    ) -> Result<(), Error> {
        Self::_require_active(&env)?;
        caller.require_auth();
        Self::_withdraw_offer(&env, listing_id, offer_id, &caller, &ipfs_hash)
    }

    fn _withdraw_offer(
        env: &Env,
        listing_id: u64,
        offer_id: u64,
        caller: &Address,
        ipfs_hash: &BytesN<32>,
    ) -> Result<(), Error> {
        let mut offers = Self::_offers(env);
        let offer = offers
            .get((listing_id, offer_id))
            .ok_or(Error::InvalidState)?;
        let listing = Self::_listings(env).get(listing_id);

        if !Self::_is_party(caller, &offer, &listing) {
            return Err(Error::PermissionDenied);
        }

        match offer.status {
            OfferStatus::Created => {
                Self::_refund_buyer(env, &offer)?;
            }
            // The listing is gone, so the commission reserved at acceptance
            // can no longer return to its deposit; pay it out instead.
            OfferStatus::Accepted if listing.is_none() => {
                Self::_pay_commission(env, &offer)?;
                Self::_refund_buyer(env, &offer)?;
            }
            _ => return Err(Error::InvalidState),
        }

        offers.remove((listing_id, offer_id));
        env.storage().instance().set(&OFFERS_KEY, &offers);

        env.events().publish(
            (OFFER_WITHDRAWN, caller.clone()),
            (listing_id, offer_id, ipfs_hash.clone()),
        );

        Ok(())
    }

    /// Adds funds to an accepted offer, increasing its escrowed value.
    ///
    /// # Errors
    /// - `InvalidState`: offer missing or not `Accepted`
    /// - `PermissionDenied`: caller is not the offer's buyer
    /// - `InvalidArgument`: negative amount
    /// - `TransferFailed`: the pull from the buyer failed
    pub fn add_funds(
        env: Env,
        listing_id: u64,
        offer_id: u64,
        buyer: Address,
        ipfs_hash: BytesN<32>,
        amount: i128,
    ) -> Result<(), Error> {
        Self::_require_active(&env)?;
        buyer.require_auth();

        let mut offers = Self::_offers(&env);
        let mut offer = offers
            .get((listing_id, offer_id))
            .ok_or(Error::InvalidState)?;
        if offer.buyer != buyer {
            return Err(Error::PermissionDenied);
        }
        if offer.status != OfferStatus::Accepted {
            return Err(Error::InvalidState);
        }
        if amount < 0 {
            return Err(Error::InvalidArgument);
        }

        let token_addr = transfer::resolve(&env, &offer.currency);
        transfer::pull(&env, &token_addr, &buyer, amount)?;

        offer.value += amount;
        offers.set((listing_id, offer_id), offer);
        env.storage().instance().set(&OFFERS_KEY, &offers);

        env.events()
            .publish((OFFER_FUNDED, buyer), (listing_id, offer_id, ipfs_hash));

        Ok(())
    }

    /// Finalizes an accepted offer, releasing the escrow: the buyer receives
    /// the earmarked refund and the seller receives the exact remainder.
    ///
    /// While `now < finalizes` only the buyer may finalize; from the deadline
    /// onward the seller may as well. The affiliate commission
    /// is paid out only when the buyer finalizes; a seller finalize leaves it
    /// reserved.
    ///
    /// # Errors
    /// - `InvalidState`: offer or listing missing, or offer not `Accepted`
    /// - `PermissionDenied`: caller outside the allowed set for the current
    ///   side of the deadline
    pub fn finalize(
        env: Env,
        listing_id: u64,
        offer_id: u64,
        caller: Address,
        ipfs_hash: BytesN<32>,
    ) -> Result<(), Error> {
        Self::_require_active(&env)?;
        caller.require_auth();

        let mut offers = Self::_offers(&env);
        let offer = offers
            .get((listing_id, offer_id))
            .ok_or(Error::InvalidState)?;
        if offer.status != OfferStatus::Accepted {
            return Err(Error::InvalidState);
        }
        let listing = Self::_listings(&env)
            .get(listing_id)
            .ok_or(Error::InvalidState)?;

        if env.ledger().timestamp() < offer.finalizes {
            // Inside the window settlement is the buyer's call alone.
            if caller != offer.buyer {
                return Err(Error::PermissionDenied);
            }
        } else if caller != offer.buyer && caller != listing.seller {
            return Err(Error::PermissionDenied);
        }

        Self::_pay_seller(&env, &listing, &offer)?;
        if caller == offer.buyer {
            Self::_pay_commission(&env, &offer)?;
        }

        offers.remove((listing_id, offer_id));
        env.storage().instance().set(&OFFERS_KEY, &offers);

        env.events()
            .publish((OFFER_FINALIZED, caller), (listing_id, offer_id, ipfs_hash));

        Ok(())
    }

    /// Disputes an accepted offer before its finalize deadline, handing
    /// settlement over to the offer's arbitrator.
    ///
    /// # Errors
    /// - `InvalidState`: offer missing, not `Accepted`, or at or past the
    ///   deadline
    /// - `PermissionDenied`: caller is neither the buyer nor the seller
    pub fn dispute(
        env: Env,
        listing_id: u64,
        offer_id: u64,
        caller: Address,
        ipfs_hash: BytesN<32>,
    ) -> Result<(), Error> {
        Self::_require_active(&env)?;
        caller.require_auth();

        let mut offers = Self::_offers(&env);
        let mut offer = offers
            .get((listing_id, offer_id))
            .ok_or(Error::InvalidState)?;
        let listing = Self::_listings(&env).get(listing_id);

        if !Self::_is_party(&caller, &offer, &listing) {
            return Err(Error::PermissionDenied);
        }
        if offer.status != OfferStatus::Accepted {
            return Err(Error::InvalidState);
        }
        if env.ledger().timestamp() >= offer.finalizes {
            return Err(Error::InvalidState);
        }

        offer.status = OfferStatus::Disputed;
        offers.set((listing_id, offer_id), offer);
        env.storage().instance().set(&OFFERS_KEY, &offers);

        env.events()
            .publish((OFFER_DISPUTED, caller), (listing_id, offer_id, ipfs_hash));

        Ok(())
    }

    /// Settles a disputed offer with the arbitrator's binding ruling.
    ///
    /// `ruling` is a two-bit mask:
    /// - bit 0 set: the buyer receives the full escrowed value; clear: the
    ///   buyer receives `refund` and the seller the exact remainder
    /// - bit 1 set: the commission is paid to the affiliate; clear: it is
    ///   credited back to the listing's deposit (a no-op if the listing has
    ///   been withdrawn)
    ///
    /// # Errors
    /// - `InvalidState`: offer missing or not `Disputed`, or the ruling needs
    ///   a seller payout but the listing is gone
    /// - `PermissionDenied`: caller is not the offer's arbitrator
    /// - `InvalidArgument`: refund negative or exceeding the escrowed value
    pub fn execute_ruling(
        env: Env,
        listing_id: u64,
        offer_id: u64,
        arbitrator: Address,
        ipfs_hash: BytesN<32>,
        ruling: u32,
        refund: i128,
    ) -> Result<(), Error> {
        Self::_require_active(&env)?;
        arbitrator.require_auth();

        let mut offers = Self::_offers(&env);
        let mut offer = offers
            .get((listing_id, offer_id))
            .ok_or(Error::InvalidState)?;
        if offer.arbitrator != arbitrator {
            return Err(Error::PermissionDenied);
        }
        if offer.status != OfferStatus::Disputed {
            return Err(Error::InvalidState);
        }
        if refund < 0 || refund > offer.value {
            return Err(Error::InvalidArgument);
        }
        offer.refund = refund;

        if ruling & 1 == 1 {
            Self::_refund_buyer(&env, &offer)?;
        } else {
            let listing = Self::_listings(&env)
                .get(listing_id)
                .ok_or(Error::InvalidState)?;
            Self::_pay_seller(&env, &listing, &offer)?;
        }

        if ruling & 2 == 2 {
            Self::_pay_commission(&env, &offer)?;
        } else {
            // Return the reserved commission to the listing's collateral.
            let mut listings = Self::_listings(&env);
            if let Some(mut listing) = listings.get(listing_id) {
                listing.deposit += offer.commission;
                listings.set(listing_id, listing);
                env.storage().instance().set(&LISTINGS_KEY, &listings);
            }
        }

        offers.remove((listing_id, offer_id));
        env.storage().instance().set(&OFFERS_KEY, &offers);

        env.events().publish(
            (OFFER_RULING, arbitrator),
            (listing_id, offer_id, ipfs_hash, ruling),
        );

        Ok(())
    }

    /// Updates the refund the buyer will receive at settlement. Only the
    /// listing's seller may set it, only while the offer is accepted, and it
    /// can never exceed the escrowed value. No funds move until settlement.
    ///
    /// # Errors
    /// - `InvalidState`: offer or listing missing, or offer not `Accepted`
    /// - `PermissionDenied`: caller is not the listing's seller
    /// - `InvalidArgument`: refund negative or exceeding the escrowed value
    pub fn update_refund(
        env: Env,
        listing_id: u64,
        offer_id: u64,
        seller: Address,
        ipfs_hash: BytesN<32>,
        refund: i128,
    ) -> Result<(), Error> {
        Self::_require_active(&env)?;
        seller.require_auth();

        let mut offers = Self::_offers(&env);
        let mut offer = offers
            .get((listing_id, offer_id))
            .ok_or(Error::InvalidState)?;
        let listing = Self::_listings(&env)
            .get(listing_id)
            .ok_or(Error::InvalidState)?;

        if listing.seller != seller {
            return Err(Error::PermissionDenied);
        }
        if offer.status != OfferStatus::Accepted {
            return Err(Error::InvalidState);
        }
        if refund < 0 || refund > offer.value {
            return Err(Error::InvalidArgument);
        }

        offer.refund = refund;
        offers.set((listing_id, offer_id), offer);
        env.storage().instance().set(&OFFERS_KEY, &offers);

        env.events()
            .publish((OFFER_DATA, seller), (listing_id, offer_id, ipfs_hash));

        Ok(())
    }

    // ================================================================================================
    // ADMINISTRATIVE FUNCTIONS
    // ================================================================================================

    /// Halts all state-changing marketplace operations. Owner only.
    pub fn pause(env: Env) -> Result<(), Error> {
        Self::_require_owner(&env)?;
        env.storage().instance().set(&PAUSED_KEY, &true);
        Ok(())
    }

    /// Resumes marketplace operations after a pause. Owner only.
    pub fn unpause(env: Env) -> Result<(), Error> {
        Self::_require_owner(&env)?;
        env.storage().instance().set(&PAUSED_KEY, &false);
        Ok(())
    }

    /// Transfers ownership. The new owner must also authorize the call, so
    /// control cannot be handed to an address nobody holds.
    pub fn set_owner(env: Env, new_owner: Address) -> Result<(), Error> {
        Self::_require_owner(&env)?;
        new_owner.require_auth();
        env.storage().persistent().set(&OWNER_KEY, &new_owner);
        env.events()
            .publish((OWNER_UPDATED, env.current_contract_address()), new_owner);
        Ok(())
    }

    /// Re-points the platform token used for listing deposits and affiliate
    /// commissions. Owner only. Existing offers keep their own currency;
    /// existing deposits remain denominated in the previous token, so this is
    /// intended for deployment-time correction rather than live migration.
    pub fn set_token(env: Env, new_token: Address) -> Result<(), Error> {
        Self::_require_owner(&env)?;
        let _ = token::Client::new(&env, &new_token).decimals();
        env.storage().persistent().set(&TOKEN_KEY, &new_token);
        env.events()
            .publish((TOKEN_UPDATED, env.current_contract_address()), new_token);
        Ok(())
    }

    /// Adds an identity to the affiliate whitelist. Owner only. Whitelisting
    /// the contract's own address acts as the allow-all sentinel, making
    /// every affiliate acceptable.
    pub fn add_affiliate(env: Env, affiliate: Address) -> Result<(), Error> {
        Self::_require_owner(&env)?;
        let mut affiliates: Map<Address, bool> =
            env.storage().instance().get(&AFFILIATES_KEY).unwrap();
        affiliates.set(affiliate.clone(), true);
        env.storage().instance().set(&AFFILIATES_KEY, &affiliates);
        env.events()
            .publish((AFFILIATE_ADDED, env.current_contract_address()), affiliate);
        Ok(())
    }

    /// Removes an identity from the affiliate whitelist. Owner only. Does not
    /// affect commissions already reserved on accepted offers.
    pub fn remove_affiliate(env: Env, affiliate: Address) -> Result<(), Error> {
        Self::_require_owner(&env)?;
        let mut affiliates: Map<Address, bool> =
            env.storage().instance().get(&AFFILIATES_KEY).unwrap();
        affiliates.remove(affiliate.clone());
        env.storage().instance().set(&AFFILIATES_KEY, &affiliates);
        env.events().publish(
            (AFFILIATE_REMOVED, env.current_contract_address()),
            affiliate,
        );
        Ok(())
    }

    // ================================================================================================
    // QUERY FUNCTIONS (GETTERS)
    // ================================================================================================

    /// Returns the current owner address.
    pub fn get_owner(env: Env) -> Address {
        env.storage().persistent().get(&OWNER_KEY).unwrap()
    }

    /// Returns the platform token contract address.
    pub fn get_token(env: Env) -> Address {
        env.storage().persistent().get(&TOKEN_KEY).unwrap()
    }

    /// Returns the native-asset contract address.
    pub fn get_native_token(env: Env) -> Address {
        env.storage().persistent().get(&NATIVE_KEY).unwrap()
    }

    /// Returns whether the contract is currently paused.
    pub fn is_paused(env: Env) -> bool {
        env.storage().instance().get(&PAUSED_KEY).unwrap_or(false)
    }

    /// Returns whether `affiliate` would pass the whitelist gate right now,
    /// accounting for the allow-all sentinel.
    pub fn is_affiliate_allowed(env: Env, affiliate: Address) -> bool {
        let affiliates: Map<Address, bool> =
            env.storage().instance().get(&AFFILIATES_KEY).unwrap();
        affiliates
            .get(env.current_contract_address())
            .unwrap_or(false)
            || affiliates.get(affiliate).unwrap_or(false)
    }

    /// Returns the number of listings ever created. Ids below this count that
    /// no longer resolve belong to withdrawn listings; ids are never reused.
    pub fn total_listings(env: Env) -> u64 {
        env.storage().instance().get(&NEXT_LISTING_ID).unwrap()
    }

    /// Returns a listing by id, or `None` if it was withdrawn or never
    /// existed.
    pub fn get_listing(env: Env, listing_id: u64) -> Option<Listing> {
        Self::_listings(&env).get(listing_id)
    }

    /// Returns the number of offers ever made against a listing.
    pub fn total_offers(env: Env, listing_id: u64) -> u64 {
        Self::_offer_seqs(&env).get(listing_id).unwrap_or(0)
    }

    /// Returns an offer by id, or `None` if it reached a terminal state or
    /// never existed.
    pub fn get_offer(env: Env, listing_id: u64, offer_id: u64) -> Option<Offer> {
        Self::_offers(&env).get((listing_id, offer_id))
    }
}
