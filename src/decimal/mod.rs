//! Exact fixed-point decimals for every price, discount and TVL computation.
//!
//! A [`Decimal`] is a signed 256-bit integer mantissa and a base-10 scale, so
//! `value = mantissa / 10^scale`. Shifting only moves the scale, which makes
//! base-unit to human-unit conversions lossless. The scale never exceeds
//! [`MAX_SCALE`], and every operation that can leave that range or overflow
//! the mantissa is `checked_*` and returns `None`.

use alloy::primitives::{I256, U256, U512};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest scale with `10^scale` still inside a positive `I256`.
pub const MAX_SCALE: u32 = 76;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid decimal literal: {0}")]
pub struct ParseDecimalError(String);

#[derive(Debug, Clone, Copy)]
pub struct Decimal {
    mantissa: I256,
    scale: u32,
}

fn pow10(exp: u32) -> Option<I256> {
    let raw = U256::from(10u8).checked_pow(U256::from(exp))?;
    let value = I256::from_raw(raw);
    (!value.is_negative()).then_some(value)
}

impl Decimal {
    pub const ZERO: Decimal = Decimal { mantissa: I256::ZERO, scale: 0 };
    pub const ONE: Decimal = Decimal { mantissa: I256::ONE, scale: 0 };

    /// `None` if `scale` is above [`MAX_SCALE`].
    pub fn new(mantissa: I256, scale: u32) -> Option<Self> {
        (scale <= MAX_SCALE).then_some(Self { mantissa, scale })
    }

    pub fn from_i64(value: i64) -> Self {
        let raw = I256::from_raw(U256::from(value.unsigned_abs()));
        let mantissa = if value < 0 { -raw } else { raw };
        Self { mantissa, scale: 0 }
    }

    /// Integer amount of base units, e.g. a raw contract return value.
    /// Returns `None` if the value does not fit a signed 256-bit mantissa.
    pub fn from_base_units(value: U256) -> Option<Self> {
        let mantissa = I256::from_raw(value);
        if mantissa.is_negative() {
            return None;
        }
        Some(Self { mantissa, scale: 0 })
    }

    /// Move the decimal point: negative `places` divide by `10^places`,
    /// positive ones multiply. Never loses digits.
    pub fn checked_shift(self, places: i32) -> Option<Self> {
        if places <= 0 {
            return Self::new(self.mantissa, self.scale.checked_add(places.unsigned_abs())?);
        }
        let places = places.unsigned_abs();
        if self.scale >= places {
            Self::new(self.mantissa, self.scale - places)
        } else {
            let mantissa = self.mantissa.checked_mul(pow10(places - self.scale)?)?;
            Self::new(mantissa, 0)
        }
    }

    pub fn checked_add(self, rhs: Decimal) -> Option<Decimal> {
        let scale = self.scale.max(rhs.scale);
        let mantissa = self.rescaled(scale)?.checked_add(rhs.rescaled(scale)?)?;
        Self::new(mantissa, scale)
    }

    pub fn checked_sub(self, rhs: Decimal) -> Option<Decimal> {
        let scale = self.scale.max(rhs.scale);
        let mantissa = self.rescaled(scale)?.checked_sub(rhs.rescaled(scale)?)?;
        Self::new(mantissa, scale)
    }

    pub fn checked_mul(self, rhs: Decimal) -> Option<Decimal> {
        let product = Decimal {
            mantissa: self.mantissa.checked_mul(rhs.mantissa)?,
            scale: self.scale + rhs.scale,
        }
        .normalize();
        Self::new(product.mantissa, product.scale)
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.mantissa.is_negative()
    }

    fn rescaled(&self, scale: u32) -> Option<I256> {
        if scale <= self.scale {
            Some(self.mantissa)
        } else {
            self.mantissa.checked_mul(pow10(scale - self.scale)?)
        }
    }

    /// Absolute value at `scale` (>= own scale), wide enough to never overflow.
    fn magnitude_at(&self, scale: u32) -> U512 {
        let magnitude = U512::from_limbs_slice(self.mantissa.unsigned_abs().as_limbs());
        let exp = U512::from(scale.saturating_sub(self.scale));
        magnitude * U512::from(10u8).pow(exp)
    }

    /// Drop trailing fractional zeros.
    pub fn normalize(self) -> Self {
        let ten = I256::from_raw(U256::from(10u8));
        let mut out = self;
        while out.scale > 0 && (out.mantissa % ten).is_zero() {
            out.mantissa = out.mantissa / ten;
            out.scale -= 1;
        }
        out
    }

    /// Cut to `dp` fractional digits, rounding toward zero.
    pub fn trunc(self, dp: u32) -> Self {
        if self.scale <= dp {
            return self;
        }
        let mantissa = match pow10(self.scale - dp) {
            Some(divisor) => self.mantissa / divisor,
            None => I256::ZERO,
        };
        Self { mantissa, scale: dp }
    }

    /// Round to `dp` fractional digits, halves away from zero.
    pub fn round(self, dp: u32) -> Self {
        if self.scale <= dp {
            return self;
        }
        let Some(divisor) = pow10(self.scale - dp) else {
            return Self { mantissa: I256::ZERO, scale: dp };
        };
        let mut mantissa = self.mantissa / divisor;
        let remainder = self.mantissa % divisor;
        if remainder.unsigned_abs() >= divisor.unsigned_abs() - remainder.unsigned_abs() {
            mantissa = if self.mantissa.is_negative() {
                mantissa - I256::ONE
            } else {
                mantissa + I256::ONE
            };
        }
        Self { mantissa, scale: dp }
    }

    /// Integer part as base units, if non-negative and whole.
    pub fn to_base_units(&self) -> Option<U256> {
        let n = self.normalize();
        if n.scale != 0 || n.mantissa.is_negative() {
            return None;
        }
        Some(n.mantissa.into_raw())
    }

    /// Integer and fractional digit strings, the latter exactly `dp` long.
    fn parts(&self, dp: u32) -> (bool, String, String) {
        let value = self.round(dp);
        let scale = value.scale as usize;
        let mut digits = value.mantissa.unsigned_abs().to_string();
        if digits.len() <= scale {
            digits = format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits);
        }
        let (int_part, frac_part) = digits.split_at(digits.len() - scale);
        let padding = "0".repeat(dp as usize - scale);
        let negative = value.is_negative() && !value.is_zero();
        (negative, int_part.to_string(), format!("{frac_part}{padding}"))
    }

    /// Plain fixed-point rendering with exactly `dp` decimals.
    pub fn to_fixed(&self, dp: u32) -> String {
        let (negative, int_part, frac_part) = self.parts(dp);
        render(negative, &int_part, &frac_part)
    }

    /// Like [`Decimal::to_fixed`] with thousands separators, e.g. `1,234.50`.
    pub fn to_grouped(&self, dp: u32) -> String {
        let (negative, int_part, frac_part) = self.parts(dp);
        let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
        for (i, c) in int_part.chars().enumerate() {
            if i > 0 && (int_part.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(c);
        }
        render(negative, &grouped, &frac_part)
    }
}

fn render(negative: bool, int_part: &str, frac_part: &str) -> String {
    let sign = if negative { "-" } else { "" };
    if frac_part.is_empty() {
        format!("{sign}{int_part}")
    } else {
        format!("{sign}{int_part}.{frac_part}")
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        let (a, b) = (self.magnitude_at(scale), other.magnitude_at(scale));
        match (self.is_negative(), other.is_negative()) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => a.cmp(&b),
            (true, true) => b.cmp(&a),
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fixed(self.scale))
    }
}

/// Accepts `123`, `-0.5`, `1.25e-7` and `4E3`, the shapes JSON numbers take.
impl FromStr for Decimal {
    type Err = ParseDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseDecimalError(s.to_string());
        let trimmed = s.trim();
        let (body, exponent) = match trimmed.find(['e', 'E']) {
            Some(idx) => {
                let exp: i32 = trimmed[idx + 1..].parse().map_err(|_| invalid())?;
                (&trimmed[..idx], exp)
            }
            None => (trimmed, 0),
        };
        let (negative, body) = match body.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, body.strip_prefix('+').unwrap_or(body)),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        let digits = format!("{int_part}{frac_part}");
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let magnitude = I256::from_dec_str(&digits).map_err(|_| invalid())?;
        let mantissa = if negative { -magnitude } else { magnitude };
        u32::try_from(frac_part.len())
            .ok()
            .and_then(|scale| Decimal::new(mantissa, scale))
            .and_then(|value| value.checked_shift(exponent))
            .ok_or_else(|| ParseDecimalError(format!("{s} is out of range")))
    }
}
