use num_bigint::BigUint;
use num_traits::Zero;
use rand::{rngs::OsRng, RngCore};
use rug::{integer::Order, rand::RandState, Integer};
use std::convert::TryInto;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FunctionError {
    #[error("random number generation failed")]
    RandomNumberGeneration,
    #[error("safe prime generation failed")]
    SafePrimeGeneration,
    #[error("invalid bit length")]
    InvalidBitLength,
}

/// Draws a uniform value in `[0, n)` by rejection sampling.
pub fn random_mod(n: &BigUint, rng: &mut impl RngCore) -> Result<BigUint, FunctionError> {
    if n.is_zero() {
        return Err(FunctionError::RandomNumberGeneration);
    }
    let bits = n.bits();
    let mut bytes = vec![0u8; ((bits + 7) / 8) as usize];
    // Mask the excess high bits so each draw succeeds with probability > 1/2.
    let excess = (bytes.len() as u64 * 8 - bits) as u32;
    loop {
        rng.fill_bytes(&mut bytes);
        if let Some(first) = bytes.first_mut() {
            *first &= 0xffu8.checked_shr(excess).unwrap_or(0);
        }
        let result = BigUint::from_bytes_be(&bytes);
        if &result < n {
            return Ok(result);
        }
    }
}

/// Draws a uniform value in `[lower, upper)`.
pub fn random_range(lower: &BigUint, upper: &BigUint) -> Result<BigUint, FunctionError> {
    if lower >= upper {
        return Err(FunctionError::RandomNumberGeneration);
    }
    let width = upper - lower;
    Ok(random_mod(&width, &mut OsRng)? + lower)
}

/// Returns `(p, q)` with `p = 2q + 1` and both probably prime.
pub fn generate_safe_primes(bit_len: usize) -> Result<(BigUint, BigUint), FunctionError> {
    if bit_len < 3 {
        return Err(FunctionError::InvalidBitLength);
    }
    let bit_len_u32 =
        TryInto::<u32>::try_into(bit_len).map_err(|_| FunctionError::InvalidBitLength)?;
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    let mut rand_state = RandState::new();
    rand_state.seed(&Integer::from_digits(&seed, Order::Msf));
    // Bounded so a broken RNG cannot spin forever.
    for _ in 0..100_000 {
        let mut q: Integer = Integer::random_bits(bit_len_u32 - 1, &mut rand_state).into();
        q.set_bit(bit_len_u32 - 2, true);
        let q = q.next_prime();
        let p: Integer = Integer::from(&q * 2) + 1;
        if p.is_probably_prime(40) != rug::integer::IsPrime::No {
            let p_big = BigUint::from_bytes_be(&p.to_digits::<u8>(Order::Msf));
            let q_big = BigUint::from_bytes_be(&q.to_digits::<u8>(Order::Msf));
            return Ok((p_big, q_big));
        }
    }
    Err(FunctionError::SafePrimeGeneration)
}
