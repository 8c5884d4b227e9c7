use std::sync::Arc;

use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G1Projective, G2Affine};
use ark_ec::{AffineRepr, CurveGroup, pairing::Pairing};
use ark_ff::{BigInteger, One, PrimeField};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use num_bigint::BigUint;
use num_traits::Zero;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::{
    common::{address::Address, hash::keccak256},
    gas::{Cost, Fork, cost, per_word},
};

pub struct PrecompileInput<'a> {
    pub data: &'a [u8],
    pub gas_limit: u64,
    pub fork: Fork,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PrecompileResult {
    pub gas_used: u64,
    pub output: Vec<u8>,
    pub success: bool,
}

impl PrecompileResult {
    fn ok(gas_used: u64, output: Vec<u8>) -> Self {
        Self {
            gas_used,
            output,
            success: true,
        }
    }

    /// Every failure looks like running out of gas: the whole offer is gone.
    fn out_of_gas(gas_limit: u64) -> Self {
        Self {
            gas_used: gas_limit,
            output: Vec::new(),
            success: false,
        }
    }
}

/// alt_bn128 arithmetic in the encoding the precompiles use.
///
/// Each routine returns an empty vector when the input does not decode to
/// valid curve points.
pub trait CurveOps: Send + Sync {
    /// Two 64-byte G1 points in, one 64-byte point out.
    fn add(&self, input: &[u8; 128]) -> Vec<u8>;

    /// A 64-byte G1 point and a 32-byte scalar in, one 64-byte point out.
    fn mul(&self, input: &[u8; 96]) -> Vec<u8>;

    /// `k` pairs of (G1, G2) points in, a 32-byte boolean out.
    fn pairing(&self, input: &[u8]) -> Vec<u8>;
}

/// Native routines at the reserved low addresses.
#[derive(Clone)]
pub struct PrecompileSet {
    curve: Arc<dyn CurveOps>,
}

impl Default for PrecompileSet {
    fn default() -> Self {
        Self::new(Arc::new(ArkBn254))
    }
}

impl std::fmt::Debug for PrecompileSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrecompileSet")
    }
}

impl PrecompileSet {
    pub fn new(curve: Arc<dyn CurveOps>) -> Self {
        Self { curve }
    }

    fn count(fork: Fork) -> u8 {
        if fork >= Fork::Istanbul { 9 } else { 8 }
    }

    pub fn contains(&self, address: &Address, fork: Fork) -> bool {
        let byte = address.0;
        byte[0..19] == [0u8; 19] && (1..=Self::count(fork)).contains(&byte[19])
    }

    pub fn addresses(&self, fork: Fork) -> impl Iterator<Item = Address> {
        (1..=Self::count(fork)).map(Address::low)
    }

    /// Runs the routine at `address`, `None` when there is none.
    pub fn run(&self, address: &Address, input: &PrecompileInput) -> Option<PrecompileResult> {
        if !self.contains(address, input.fork) {
            return None;
        }
        let result = match address.0[19] {
            1 => ecrecover(input),
            2 => sha256(input),
            3 => ripemd160(input),
            4 => identity(input),
            5 => modexp(input),
            6 => self.ecadd(input),
            7 => self.ecmul(input),
            8 => self.ecpairing(input),
            9 => blake2f(input),
            _ => return None,
        };
        tracing::debug!(
            "PRECOMPILE: {address} gas={}/{} ok={}",
            result.gas_used,
            input.gas_limit,
            result.success
        );
        Some(result)
    }

    fn ecadd(&self, input: &PrecompileInput) -> PrecompileResult {
        let gas = cost(input.fork, Cost::EcAdd);
        if input.gas_limit < gas {
            return PrecompileResult::out_of_gas(input.gas_limit);
        }
        let output = self.curve.add(&padded(input.data));
        if output.len() != 64 {
            return PrecompileResult::out_of_gas(input.gas_limit);
        }
        PrecompileResult::ok(gas, output)
    }

    fn ecmul(&self, input: &PrecompileInput) -> PrecompileResult {
        let gas = cost(input.fork, Cost::EcMul);
        if input.gas_limit < gas {
            return PrecompileResult::out_of_gas(input.gas_limit);
        }
        // A malformed point and a short budget are indistinguishable here.
        let output = self.curve.mul(&padded(input.data));
        if output.len() != 64 {
            return PrecompileResult::out_of_gas(input.gas_limit);
        }
        PrecompileResult::ok(gas, output)
    }

    fn ecpairing(&self, input: &PrecompileInput) -> PrecompileResult {
        let pairs = (input.data.len() / 192) as u64;
        let gas = cost(input.fork, Cost::EcPairing)
            .saturating_add(cost(input.fork, Cost::EcPairingPair).saturating_mul(pairs));
        if input.gas_limit < gas || !input.data.len().is_multiple_of(192) {
            return PrecompileResult::out_of_gas(input.gas_limit);
        }
        let output = self.curve.pairing(input.data);
        if output.len() != 32 {
            return PrecompileResult::out_of_gas(input.gas_limit);
        }
        PrecompileResult::ok(gas, output)
    }
}

/// Input truncated or zero-padded to exactly `N` bytes.
fn padded<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    let n = data.len().min(N);
    buf[..n].copy_from_slice(&data[..n]);
    buf
}

fn charge_words(input: &PrecompileInput, base: Cost, word: Cost) -> Option<u64> {
    let gas = per_word(input.fork, base, word, input.data.len());
    (gas <= input.gas_limit).then_some(gas)
}

// 0x01
fn ecrecover(input: &PrecompileInput) -> PrecompileResult {
    let gas = cost(input.fork, Cost::EcRecover);
    if input.gas_limit < gas {
        return PrecompileResult::out_of_gas(input.gas_limit);
    }
    let output = recover(&padded(input.data)).unwrap_or_default();
    PrecompileResult::ok(gas, output)
}

const SECP256K1_N: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE,
    0xBA, 0xAE, 0xDC, 0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C, 0xD0, 0x36, 0x41, 0x41,
];

const SECP256K1_N_HALF: [u8; 32] = [
    0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x5D, 0x57, 0x6E, 0x73, 0x57, 0xA4, 0x50, 0x1D, 0xDF, 0xE9, 0x2F, 0x46, 0x68, 0x1B, 0x20, 0xA0,
];

/// Signer address left-padded to 32 bytes, `None` for anything unrecoverable.
fn recover(input: &[u8; 128]) -> Option<Vec<u8>> {
    let hash = &input[0..32];
    let v = &input[32..64];
    let r = &input[64..96];
    let s = &input[96..128];

    if v[..31].iter().any(|byte| *byte != 0) || !(27..=28).contains(&v[31]) {
        return None;
    }
    let mut recovery_id = v[31] - 27;

    let mut signature = [0u8; 64];
    signature[0..32].copy_from_slice(r);
    signature[32..64].copy_from_slice(s);

    // k256 only takes low-s signatures; flip high-s ones and the parity with them.
    if s > &SECP256K1_N_HALF[..] && s < &SECP256K1_N[..] {
        let low = BigUint::from_bytes_be(&SECP256K1_N) - BigUint::from_bytes_be(s);
        let low = low.to_bytes_be();
        signature[32..64].fill(0);
        signature[64 - low.len()..64].copy_from_slice(&low);
        recovery_id ^= 1;
    }

    let signature = Signature::from_slice(&signature).ok()?;
    let recovery_id = RecoveryId::from_byte(recovery_id)?;
    let key = VerifyingKey::recover_from_prehash(hash, &signature, recovery_id).ok()?;

    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut output = vec![0u8; 32];
    output[12..32].copy_from_slice(&hash[12..32]);
    Some(output)
}

// 0x02
fn sha256(input: &PrecompileInput) -> PrecompileResult {
    let Some(gas) = charge_words(input, Cost::Sha256, Cost::Sha256Word) else {
        return PrecompileResult::out_of_gas(input.gas_limit);
    };
    let mut hasher = Sha256::new();
    hasher.update(input.data);
    PrecompileResult::ok(gas, hasher.finalize().to_vec())
}

// 0x03
fn ripemd160(input: &PrecompileInput) -> PrecompileResult {
    let Some(gas) = charge_words(input, Cost::Ripemd160, Cost::Ripemd160Word) else {
        return PrecompileResult::out_of_gas(input.gas_limit);
    };
    let mut hasher = Ripemd160::new();
    hasher.update(input.data);
    let hash = hasher.finalize();

    let mut output = vec![0u8; 32];
    output[12..32].copy_from_slice(&hash);
    PrecompileResult::ok(gas, output)
}

// 0x04
fn identity(input: &PrecompileInput) -> PrecompileResult {
    let Some(gas) = charge_words(input, Cost::Identity, Cost::IdentityWord) else {
        return PrecompileResult::out_of_gas(input.gas_limit);
    };
    PrecompileResult::ok(gas, input.data.to_vec())
}

/// `len` bytes of `data` from `offset`, zero past the end.
fn read_padded(data: &[u8], offset: u64, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let Ok(start) = usize::try_from(offset) else {
        return buf;
    };
    if start < data.len() {
        let n = len.min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
    }
    buf
}

/// At most `len` bytes of `data` from `offset`, without padding.
fn read_present(data: &[u8], offset: u64, len: usize) -> &[u8] {
    let Some(rest) = usize::try_from(offset).ok().and_then(|start| data.get(start..)) else {
        return &[];
    };
    &rest[..len.min(rest.len())]
}

fn read_len(data: &[u8], offset: u64) -> u64 {
    let word = BigUint::from_bytes_be(&read_padded(data, offset, 32));
    u64::try_from(word).unwrap_or(u64::MAX)
}

fn adjusted_exp_len(exp_len: u64, head: &BigUint) -> u64 {
    let bits = if head.is_zero() { 0 } else { head.bits() - 1 };
    if exp_len <= 32 {
        bits
    } else {
        8u64.saturating_mul(exp_len - 32).saturating_add(bits)
    }
}

pub fn modexp_cost(fork: Fork, base_len: u64, exp_len: u64, mod_len: u64, exp_head: &BigUint) -> u64 {
    let max_len = base_len.max(mod_len) as u128;
    let iterations = adjusted_exp_len(exp_len, exp_head).max(1) as u128;

    let gas = if fork >= Fork::Berlin {
        // EIP-2565
        let words = max_len.div_ceil(8);
        let complexity = words.saturating_mul(words);
        (complexity.saturating_mul(iterations) / cost(fork, Cost::ModExpDivisor) as u128)
            .max(cost(fork, Cost::ModExpMin) as u128)
    } else {
        // EIP-198
        let x = max_len;
        let complexity = if x <= 64 {
            x * x
        } else if x <= 1024 {
            x * x / 4 + 96 * x - 3072
        } else {
            (x.saturating_mul(x) / 16).saturating_add(480 * x) - 199_680
        };
        complexity.saturating_mul(iterations) / cost(fork, Cost::ModExpDivisor) as u128
    };
    u64::try_from(gas).unwrap_or(u64::MAX)
}

// 0x05
fn modexp(input: &PrecompileInput) -> PrecompileResult {
    let data = input.data;
    let base_len = read_len(data, 0);
    let exp_len = read_len(data, 32);
    let mod_len = read_len(data, 64);

    let exp_offset = 96u64.saturating_add(base_len);
    let exp_head = BigUint::from_bytes_be(&read_padded(data, exp_offset, exp_len.min(32) as usize));

    let gas = modexp_cost(input.fork, base_len, exp_len, mod_len, &exp_head);
    if input.gas_limit < gas {
        return PrecompileResult::out_of_gas(input.gas_limit);
    }
    if base_len == 0 && mod_len == 0 {
        return PrecompileResult::ok(gas, Vec::new());
    }

    let (Ok(base_len), Ok(exp_len), Ok(mod_len)) = (
        usize::try_from(base_len),
        usize::try_from(exp_len),
        usize::try_from(mod_len),
    ) else {
        return PrecompileResult::out_of_gas(input.gas_limit);
    };

    let mod_offset = exp_offset.saturating_add(exp_len as u64);
    let modulus = BigUint::from_bytes_be(&read_padded(data, mod_offset, mod_len));
    let mut output = vec![0u8; mod_len];
    if modulus.is_zero() || modulus == BigUint::from(1u8) {
        return PrecompileResult::ok(gas, output);
    }

    // A nonzero modulus lies past the exponent, so every exponent byte is present.
    let base = BigUint::from_bytes_be(&read_padded(data, 96, base_len));
    let exp = BigUint::from_bytes_be(read_present(data, exp_offset, exp_len));
    let result = base.modpow(&exp, &modulus).to_bytes_be();
    output[mod_len - result.len()..].copy_from_slice(&result);
    PrecompileResult::ok(gas, output)
}

// 0x09
fn blake2f(input: &PrecompileInput) -> PrecompileResult {
    let data = input.data;
    if data.len() != 213 {
        return PrecompileResult::out_of_gas(input.gas_limit);
    }
    let rounds = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let gas = cost(input.fork, Cost::Blake2Round) * rounds as u64;
    if input.gas_limit < gas {
        return PrecompileResult::out_of_gas(input.gas_limit);
    }
    let f = match data[212] {
        0 => false,
        1 => true,
        _ => return PrecompileResult::out_of_gas(input.gas_limit),
    };

    let word = |start: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[start..start + 8]);
        u64::from_le_bytes(bytes)
    };
    let h: [u64; 8] = std::array::from_fn(|i| word(4 + i * 8));
    let m: [u64; 16] = std::array::from_fn(|i| word(68 + i * 8));
    let t: [u64; 2] = std::array::from_fn(|i| word(196 + i * 8));

    let h = blake2f_compression(h, m, t, f, rounds);

    let mut output = vec![0u8; 64];
    for (i, word) in h.iter().enumerate() {
        output[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
    }
    PrecompileResult::ok(gas, output)
}

const BLAKE2B_IV: [u64; 8] = [
    0x6a09e667f3bcc908,
    0xbb67ae8584caa73b,
    0x3c6ef372fe94f82b,
    0xa54ff53a5f1d36f1,
    0x510e527fade682d1,
    0x9b05688c2b3e6c1f,
    0x1f83d9abfb41bd6b,
    0x5be0cd19137e2179,
];

const SIGMA: [[usize; 16]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
    [14, 10, 4, 8, 9, 15, 13, 6, 1, 12, 0, 2, 11, 7, 5, 3],
    [11, 8, 12, 0, 5, 2, 15, 13, 10, 14, 3, 6, 7, 1, 9, 4],
    [7, 9, 3, 1, 13, 12, 11, 14, 2, 6, 5, 10, 4, 0, 15, 8],
    [9, 0, 5, 7, 2, 4, 10, 15, 14, 1, 11, 12, 6, 8, 3, 13],
    [2, 12, 6, 10, 0, 11, 8, 3, 4, 13, 7, 5, 15, 14, 1, 9],
    [12, 5, 1, 15, 14, 13, 4, 10, 0, 7, 6, 3, 9, 2, 8, 11],
    [13, 11, 7, 14, 12, 1, 3, 9, 5, 0, 15, 4, 8, 6, 2, 10],
    [6, 15, 14, 9, 11, 3, 0, 8, 12, 2, 13, 7, 1, 4, 10, 5],
    [10, 2, 8, 4, 7, 6, 1, 5, 15, 11, 9, 14, 3, 12, 13, 0],
];

fn blake2f_compression(
    mut h: [u64; 8],
    m: [u64; 16],
    t: [u64; 2],
    f: bool,
    rounds: u32,
) -> [u64; 8] {
    let mut v = [0u64; 16];
    v[0..8].copy_from_slice(&h);
    v[8..16].copy_from_slice(&BLAKE2B_IV);
    v[12] ^= t[0];
    v[13] ^= t[1];
    if f {
        v[14] = !v[14];
    }

    for round in 0..rounds as usize {
        let s = &SIGMA[round % 10];

        mix(&mut v, 0, 4, 8, 12, m[s[0]], m[s[1]]);
        mix(&mut v, 1, 5, 9, 13, m[s[2]], m[s[3]]);
        mix(&mut v, 2, 6, 10, 14, m[s[4]], m[s[5]]);
        mix(&mut v, 3, 7, 11, 15, m[s[6]], m[s[7]]);

        mix(&mut v, 0, 5, 10, 15, m[s[8]], m[s[9]]);
        mix(&mut v, 1, 6, 11, 12, m[s[10]], m[s[11]]);
        mix(&mut v, 2, 7, 8, 13, m[s[12]], m[s[13]]);
        mix(&mut v, 3, 4, 9, 14, m[s[14]], m[s[15]]);
    }

    for i in 0..8 {
        h[i] ^= v[i] ^ v[i + 8];
    }
    h
}

fn mix(v: &mut [u64; 16], a: usize, b: usize, c: usize, d: usize, x: u64, y: u64) {
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(x);
    v[d] = (v[d] ^ v[a]).rotate_right(32);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(24);
    v[a] = v[a].wrapping_add(v[b]).wrapping_add(y);
    v[d] = (v[d] ^ v[a]).rotate_right(16);
    v[c] = v[c].wrapping_add(v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(63);
}

/// `CurveOps` over arkworks' BN254.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArkBn254;

impl ArkBn254 {
    /// Field element, rejecting encodings at or above the modulus.
    fn fq(bytes: &[u8]) -> Option<Fq> {
        let fq = Fq::from_be_bytes_mod_order(bytes);
        (fq_to_bytes(fq).as_slice() == bytes).then_some(fq)
    }

    fn g1(bytes: &[u8]) -> Option<G1Affine> {
        let x = Self::fq(&bytes[0..32])?;
        let y = Self::fq(&bytes[32..64])?;
        if is_zero(&bytes[0..64]) {
            return Some(G1Affine::zero());
        }
        let point = G1Affine::new_unchecked(x, y);
        point.is_on_curve().then_some(point)
    }

    /// Imaginary part first, as the pairing precompile encodes it.
    fn g2(bytes: &[u8]) -> Option<G2Affine> {
        let x = Fq2::new(Self::fq(&bytes[32..64])?, Self::fq(&bytes[0..32])?);
        let y = Fq2::new(Self::fq(&bytes[96..128])?, Self::fq(&bytes[64..96])?);
        if is_zero(&bytes[0..128]) {
            return Some(G2Affine::zero());
        }
        let point = G2Affine::new_unchecked(x, y);
        (point.is_on_curve() && point.is_in_correct_subgroup_assuming_on_curve()).then_some(point)
    }

    fn encode(point: G1Projective) -> Vec<u8> {
        let point = point.into_affine();
        let mut output = vec![0u8; 64];
        if !point.infinity {
            output[0..32].copy_from_slice(&fq_to_bytes(point.x));
            output[32..64].copy_from_slice(&fq_to_bytes(point.y));
        }
        output
    }
}

impl CurveOps for ArkBn254 {
    fn add(&self, input: &[u8; 128]) -> Vec<u8> {
        let (Some(p1), Some(p2)) = (Self::g1(&input[0..64]), Self::g1(&input[64..128])) else {
            return Vec::new();
        };
        Self::encode(G1Projective::from(p1) + G1Projective::from(p2))
    }

    fn mul(&self, input: &[u8; 96]) -> Vec<u8> {
        let Some(point) = Self::g1(&input[0..64]) else {
            return Vec::new();
        };
        let scalar = Fr::from_be_bytes_mod_order(&input[64..96]);
        Self::encode(G1Projective::from(point) * scalar)
    }

    fn pairing(&self, input: &[u8]) -> Vec<u8> {
        if !input.len().is_multiple_of(192) {
            return Vec::new();
        }
        let mut g1 = Vec::with_capacity(input.len() / 192);
        let mut g2 = Vec::with_capacity(input.len() / 192);
        for chunk in input.chunks_exact(192) {
            let (Some(a), Some(b)) = (Self::g1(&chunk[0..64]), Self::g2(&chunk[64..192])) else {
                return Vec::new();
            };
            g1.push(a);
            g2.push(b);
        }

        let mut output = vec![0u8; 32];
        if g1.is_empty() || Bn254::multi_pairing(g1, g2).0.is_one() {
            output[31] = 1;
        }
        output
    }
}

fn is_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|byte| *byte == 0)
}

fn fq_to_bytes(fq: Fq) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    let fq_bytes = fq.into_bigint().to_bytes_be();
    let start = 32 - fq_bytes.len();
    bytes[start..].copy_from_slice(&fq_bytes);
    bytes
}
