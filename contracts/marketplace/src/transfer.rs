/*!
 * Value transfer adapter.
 *
 * Uniform interface over the two currency kinds an offer can be denominated
 * in: the chain's native asset and arbitrary fungible token contracts. All
 * escrow pulls and payout pushes in the contract go through this module, and
 * every reported failure is a hard abort of the enclosing operation.
 */

use soroban_sdk::{log, token, Address, Env};

use crate::types::{Currency, Error};

/// Resolves a currency to the token contract that implements it.
///
/// The native asset is itself a token contract on Soroban; its address is
/// configured once at initialization, so an offer created as `Native` keeps
/// settling through the same asset even if the platform token is re-pointed
/// later.
pub fn resolve(env: &Env, currency: &Currency) -> Address {
    match currency {
        Currency::Native => env
            .storage()
            .persistent()
            .get(&crate::NATIVE_KEY)
            .unwrap(),
        Currency::Token(addr) => addr.clone(),
    }
}

/// Pulls `amount` of `token_addr` from `from` into the contract's escrow
/// balance.
///
/// A zero amount is a successful no-op; no token invocation is made. Any
/// transfer failure maps to `TransferFailed` and must abort the caller.
pub fn pull(env: &Env, token_addr: &Address, from: &Address, amount: i128) -> Result<(), Error> {
    if amount == 0 {
        return Ok(());
    }
    let client = token::Client::new(env, token_addr);
    match client.try_transfer(from, &env.current_contract_address(), &amount) {
        Ok(_) => Ok(()),
        Err(_) => {
            log!(env, "escrow pull of {} failed", amount);
            Err(Error::TransferFailed)
        }
    }
}

/// Pushes `amount` of `token_addr` out of escrow to `to`.
///
/// Same failure contract as `pull`: zero amounts succeed without a token
/// invocation, and any failure aborts the enclosing operation.
pub fn push(env: &Env, token_addr: &Address, to: &Address, amount: i128) -> Result<(), Error> {
    if amount == 0 {
        return Ok(());
    }
    let client = token::Client::new(env, token_addr);
    match client.try_transfer(&env.current_contract_address(), to, &amount) {
        Ok(_) => Ok(()),
        Err(_) => {
            log!(env, "escrow payout of {} failed", amount);
            Err(Error::TransferFailed)
        }
    }
}
