/// Tag constants.
const FIXNUM_MASK: u64 = 0b1;
const TAG_MASK: u64 = 0b11;
const REF_TAG: u64 = 0b01;
const IMMEDIATE_TAG: u64 = 0b11;

const IMMEDIATE_SHIFT: u64 = 2;
const IMMEDIATE_KIND_MASK: u64 = 0b11_1111 << IMMEDIATE_SHIFT;
const PAYLOAD_SHIFT: u64 = 8;

/// Kind of a non-fixnum immediate, stored in bits 2..8 of the word.
///
/// Fixnums have their own tag bit but still get a kind here so class
/// data for immediates can name them uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ImmediateTag {
    Nil = 0,
    True,
    False,
    Symbol,
    Undefined,
    Fixnum,
}

impl ImmediateTag {
    pub const COUNT: usize = Self::Fixnum as usize + 1;

    #[inline(always)]
    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Nil),
            1 => Some(Self::True),
            2 => Some(Self::False),
            3 => Some(Self::Symbol),
            4 => Some(Self::Undefined),
            _ => None,
        }
    }
}

/// A tagged 64-bit value.
///
/// Encoding:
/// - **Fixnum**:    `...XXXXX0`: 63-bit signed integer (low bit 0).
/// - **Reference**: `...XXXX01`: object identity shifted left by 2.
/// - **Immediate**: `...KKKKKK11`: [`ImmediateTag`] in bits 2..8, payload above.
///
/// References carry the identity the collector knows an object by, not a
/// raw address, so a relocating collector hands back a different reference
/// for the same object.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    pub const NIL: Value = Value::immediate(ImmediateTag::Nil, 0);
    pub const TRUE: Value = Value::immediate(ImmediateTag::True, 0);
    pub const FALSE: Value = Value::immediate(ImmediateTag::False, 0);
    pub const UNDEFINED: Value = Value::immediate(ImmediateTag::Undefined, 0);

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    // ── Fixnum ─────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_fixnum(self) -> bool {
        self.0 & FIXNUM_MASK == 0
    }

    #[inline(always)]
    pub fn from_i64(n: i64) -> Self {
        debug_assert!(
            (-(1i64 << 62)..(1i64 << 62)).contains(&n),
            "fixnum overflow: {n}"
        );
        Self((n << 1) as u64)
    }

    #[inline(always)]
    pub fn as_i64(self) -> Option<i64> {
        if self.is_fixnum() {
            Some((self.0 as i64) >> 1)
        } else {
            None
        }
    }

    // ── Reference ──────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_ref(self) -> bool {
        self.0 & TAG_MASK == REF_TAG
    }

    /// Tag an object identity as a reference.
    #[inline(always)]
    pub const fn from_identity(id: u64) -> Self {
        Self((id << 2) | REF_TAG)
    }

    #[inline(always)]
    pub fn identity(self) -> Option<u64> {
        if self.is_ref() {
            Some(self.0 >> 2)
        } else {
            None
        }
    }

    // ── Immediate ──────────────────────────────────────────────────

    #[inline(always)]
    pub const fn immediate(tag: ImmediateTag, payload: u64) -> Self {
        Self(
            (payload << PAYLOAD_SHIFT)
                | ((tag as u64) << IMMEDIATE_SHIFT)
                | IMMEDIATE_TAG,
        )
    }

    #[inline(always)]
    pub const fn is_immediate(self) -> bool {
        self.0 & TAG_MASK == IMMEDIATE_TAG
    }

    /// The immediate kind of this value, or `None` for references.
    #[inline]
    pub fn immediate_tag(self) -> Option<ImmediateTag> {
        if self.is_fixnum() {
            return Some(ImmediateTag::Fixnum);
        }
        if !self.is_immediate() {
            return None;
        }
        let bits = ((self.0 & IMMEDIATE_KIND_MASK) >> IMMEDIATE_SHIFT) as u8;
        ImmediateTag::from_bits(bits)
    }

    #[inline(always)]
    pub const fn payload(self) -> u64 {
        self.0 >> PAYLOAD_SHIFT
    }

    #[inline(always)]
    pub const fn is_nil(self) -> bool {
        self.0 == Self::NIL.0
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::NIL
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(n) = self.as_i64() {
            write!(f, "Fixnum({n})")
        } else if let Some(id) = self.identity() {
            write!(f, "Ref(#{id})")
        } else {
            match self.immediate_tag() {
                Some(ImmediateTag::Nil) => write!(f, "nil"),
                Some(ImmediateTag::True) => write!(f, "true"),
                Some(ImmediateTag::False) => write!(f, "false"),
                Some(ImmediateTag::Undefined) => write!(f, "undefined"),
                Some(ImmediateTag::Symbol) => {
                    write!(f, "Symbol({})", self.payload())
                }
                _ => write!(f, "Immediate(0x{:016x})", self.0),
            }
        }
    }
}
