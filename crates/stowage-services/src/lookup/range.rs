use stowage_core::AppError;

/// A single byte range as requested by a client, before it is checked against a size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-end` or, open-ended, `bytes=start-`. `end` is inclusive.
    From { start: u64, end: Option<u64> },
    /// `bytes=-n`: the last `n` bytes
    Suffix(u64),
}

/// A satisfiable range. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
    pub size: u64,
}

impl ResolvedRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_full(&self) -> bool {
        self.start == 0 && self.end + 1 == self.size
    }
}

impl ByteRange {
    /// Parse a `Range` header value.
    ///
    /// Returns `Ok(None)` for units other than `bytes` and for multi-range requests,
    /// which are answered with the whole artifact.
    pub fn parse(value: &str) -> Result<Option<Self>, AppError> {
        let Some(set) = value.trim().strip_prefix("bytes=") else {
            return Ok(None);
        };
        if set.contains(',') {
            return Ok(None);
        }

        let invalid = || AppError::InvalidInput(format!("Malformed Range header: {:?}", value));
        let (start, end) = set.trim().split_once('-').ok_or_else(invalid)?;
        let parse = |s: &str| s.trim().parse::<u64>().map_err(|_| invalid());

        match (start.trim().is_empty(), end.trim().is_empty()) {
            (true, true) => Err(invalid()),
            (true, false) => Ok(Some(ByteRange::Suffix(parse(end)?))),
            (false, true) => Ok(Some(ByteRange::From {
                start: parse(start)?,
                end: None,
            })),
            (false, false) => Ok(Some(ByteRange::From {
                start: parse(start)?,
                end: Some(parse(end)?),
            })),
        }
    }

    /// Check the range against an artifact of `size` bytes.
    ///
    /// An end past the last byte is clamped; a start at or past the end of the
    /// artifact is `RangeNotSatisfiable`.
    pub fn resolve(&self, size: u64) -> Result<ResolvedRange, AppError> {
        match *self {
            ByteRange::From { start, end } => {
                let unsatisfiable = AppError::RangeNotSatisfiable {
                    start,
                    end: end.unwrap_or(start),
                    size,
                };
                if start >= size {
                    return Err(unsatisfiable);
                }
                let end = match end {
                    Some(end) if end < start => return Err(unsatisfiable),
                    Some(end) => end.min(size - 1),
                    None => size - 1,
                };
                Ok(ResolvedRange { start, end, size })
            }
            ByteRange::Suffix(len) => {
                if len == 0 || size == 0 {
                    return Err(AppError::RangeNotSatisfiable {
                        start: size,
                        end: size,
                        size,
                    });
                }
                Ok(ResolvedRange {
                    start: size - len.min(size),
                    end: size - 1,
                    size,
                })
            }
        }
    }
}
