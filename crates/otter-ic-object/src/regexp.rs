//! Regular expressions backed by `regress` in UTF-16 mode.

use std::ops::Range;

use crate::context::RuntimeError;
use crate::string::JsString;

/// Fixed slot holding a RegExp object's flags as an int32.
pub const REGEXP_FLAGS_SLOT: usize = 0;

/// RegExp flag bits, as stored in [`REGEXP_FLAGS_SLOT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegExpFlags(u32);

impl RegExpFlags {
    /// `d`
    pub const HAS_INDICES: u32 = 0x40;
    /// `g`
    pub const GLOBAL: u32 = 0x02;
    /// `i`
    pub const IGNORE_CASE: u32 = 0x01;
    /// `m`
    pub const MULTILINE: u32 = 0x04;
    /// `s`
    pub const DOT_ALL: u32 = 0x20;
    /// `u`
    pub const UNICODE: u32 = 0x10;
    /// `y`
    pub const STICKY: u32 = 0x08;

    /// Parse a flags string such as `"gi"`.
    pub fn parse(flags: &str) -> Result<Self, RuntimeError> {
        let mut bits = 0;
        for ch in flags.chars() {
            let bit = match ch {
                'd' => Self::HAS_INDICES,
                'g' => Self::GLOBAL,
                'i' => Self::IGNORE_CASE,
                'm' => Self::MULTILINE,
                's' => Self::DOT_ALL,
                'u' => Self::UNICODE,
                'y' => Self::STICKY,
                _ => return Err(RuntimeError::RegExpSyntax(format!("invalid flag '{ch}'"))),
            };
            if bits & bit != 0 {
                return Err(RuntimeError::RegExpSyntax(format!("duplicate flag '{ch}'")));
            }
            bits |= bit;
        }
        Ok(Self(bits))
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether any bit of `mask` is set.
    #[inline]
    pub const fn contains_any(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    fn engine_flags(self) -> String {
        let mut out = String::new();
        for (bit, ch) in [
            (Self::IGNORE_CASE, 'i'),
            (Self::MULTILINE, 'm'),
            (Self::DOT_ALL, 's'),
            (Self::UNICODE, 'u'),
        ] {
            if self.contains_any(bit) {
                out.push(ch);
            }
        }
        out
    }
}

/// A successful match: overall range and capture groups, in code units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegExpMatch {
    /// Range of the whole match.
    pub range: Range<usize>,
    /// Capture groups 1.., `None` when a group did not participate.
    pub captures: Vec<Option<Range<usize>>>,
}

/// Compiled pattern plus its source and flags.
pub struct RegExpData {
    source: String,
    flags: RegExpFlags,
    regex: regress::Regex,
}

impl std::fmt::Debug for RegExpData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}/{:#x}", self.source, self.flags.bits())
    }
}

impl RegExpData {
    /// Compile `source` with `flags`.
    pub fn compile(source: &str, flags: RegExpFlags) -> Result<Self, RuntimeError> {
        let regex = regress::Regex::with_flags(source, flags.engine_flags().as_str())
            .map_err(|e| RuntimeError::RegExpSyntax(e.to_string()))?;
        Ok(Self {
            source: source.to_string(),
            flags,
            regex,
        })
    }

    /// Pattern source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Flags.
    pub fn flags(&self) -> RegExpFlags {
        self.flags
    }

    /// Run the pattern against `input` starting at `last_index`.
    ///
    /// A negative `last_index` is an error; one past the end of the input
    /// never matches. Sticky patterns only match at `last_index`.
    pub fn exec_at(
        &self,
        input: &JsString,
        last_index: i32,
    ) -> Result<Option<RegExpMatch>, RuntimeError> {
        let start = usize::try_from(last_index)
            .map_err(|_| RuntimeError::InvalidLastIndex(last_index))?;
        if start > input.len() {
            return Ok(None);
        }
        let Some(found) = self.regex.find_from_utf16(input.units(), start).next() else {
            return Ok(None);
        };
        if self.flags.contains_any(RegExpFlags::STICKY) && found.start() != start {
            return Ok(None);
        }
        Ok(Some(RegExpMatch {
            range: found.start()..found.end(),
            captures: found.groups().skip(1).collect(),
        }))
    }
}
