use bytemuck::{Pod, Zeroable};

/// A PICA shader float: 1 sign bit, 7 exponent bits (bias 63), 16 fraction
/// bits.
///
/// The working representation is IEEE-754 binary32 so that both back-ends
/// can run on native float lanes; the 24-bit packing only exists at the
/// boundaries (uniform upload, attribute ingestion, output commit). Every
/// value representable in the packed format converts to binary32 and back
/// without loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(transparent)]
pub struct Float24(f32);

/// Largest finite packed value: maximum exponent, all fraction bits set.
const MAX_RAW: u32 = 0x7F_FFFF;

impl Float24 {
    pub const ZERO: Self = Self(0.0);
    pub const ONE: Self = Self(1.0);

    /// Wraps a binary32 value without quantising. Use [`Float24::quantize`]
    /// when the value crosses the hardware boundary.
    pub fn from_f32(value: f32) -> Self {
        Self(value)
    }

    pub fn to_f32(self) -> f32 {
        self.0
    }

    /// Decodes the low 24 bits of `raw`.
    ///
    /// The hardware format has no denormals, infinities, or NaNs: any
    /// non-zero encoding is `(-1)^s * 2^(e-63) * (1 + f/2^16)`, and the only
    /// zero is the encoding whose exponent and fraction are both zero.
    pub fn from_raw(raw: u32) -> Self {
        let raw = raw & 0xFF_FFFF;
        if raw & 0x7F_FFFF == 0 {
            // Preserve the sign so -0.0 round-trips.
            return Self(f32::from_bits((raw >> 23) << 31));
        }
        let sign = raw >> 23;
        let exponent = (raw >> 16) & 0x7F;
        let fraction = raw & 0xFFFF;
        // Re-bias 63 -> 127; the result always lands in the normal range.
        let bits = (sign << 31) | ((exponent + 64) << 23) | (fraction << 7);
        Self(f32::from_bits(bits))
    }

    /// Packs to the 24-bit format, truncating excess fraction bits.
    ///
    /// Values below the smallest normal pack to (signed) zero; values above
    /// the largest finite encoding (including infinities) saturate to it;
    /// NaN packs to the maximum exponent with a non-zero fraction.
    pub fn to_raw(self) -> u32 {
        let bits = self.0.to_bits();
        let sign = bits >> 31;
        let exponent = (bits >> 23) & 0xFF;
        let fraction = bits & 0x7F_FFFF;

        if exponent == 0xFF && fraction != 0 {
            return (sign << 23) | (0x7F << 16) | ((fraction >> 7) | 1);
        }
        if exponent < 64 {
            return sign << 23;
        }
        if exponent > 191 {
            return (sign << 23) | MAX_RAW;
        }
        (sign << 23) | ((exponent - 64) << 16) | (fraction >> 7)
    }

    /// Quantises a binary32 value through the packed representation, as the
    /// hardware does when a float crosses into the shader core.
    pub fn quantize(value: f32) -> Self {
        Self::from_raw(Self(value).to_raw())
    }
}

impl From<f32> for Float24 {
    fn from(value: f32) -> Self {
        Self::from_f32(value)
    }
}

impl From<Float24> for f32 {
    fn from(value: Float24) -> f32 {
        value.to_f32()
    }
}
