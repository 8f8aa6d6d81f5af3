//! `key=value&key` parser shared by query strings, the `Cookie` header and
//! url-encoded form bodies.

use crate::{errors::Error, http::types::Params};
use memchr::memchr;

/// Splitter for `&`-separated `key=value` lists.
///
/// - segments are separated by `&`, empty segments are skipped
/// - each segment is split on its first `=`; `a=b=c` gives key `a`, value `b=c`
/// - a segment without `=` gets no value
/// - nothing is percent-decoded, `%40` stays `%40`
///
/// # Examples
/// ```rust
/// use microserve::query::Query;
/// use microserve::Params;
///
/// let params: Params = Query::parse("a=1&b&&c=x=y", 10).unwrap();
///
/// assert_eq!(params.len(), 3);
/// assert_eq!(params["a"].as_deref(), Some("1"));
/// assert_eq!(params["b"], None);
/// assert_eq!(params["c"].as_deref(), Some("x=y"));
///
/// // More segments than the limit allows
/// assert!(Query::parse::<Params>("a=1&b=2", 1).is_err());
/// ```
pub struct Query;

impl Query {
    /// Parses `input` into a new collection.
    #[inline(always)]
    pub fn parse<'a, C: QueryCollector<'a>>(input: &'a str, limit: usize) -> Result<C, Error> {
        let mut result = C::with_capacity(limit.min(16));
        Self::parse_into(&mut result, input, limit)?;
        Ok(result)
    }

    /// Parses `input` and appends every pair to `result`.
    ///
    /// At most `limit` non-empty segments are accepted, otherwise
    /// [`Error::TooManyParams`] is returned.
    pub fn parse_into<'a, C: QueryCollector<'a>>(
        result: &mut C,
        input: &'a str,
        limit: usize,
    ) -> Result<(), Error> {
        let data = input.as_bytes();
        let mut count = 0;

        let mut start = 0;
        while start < data.len() {
            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            if start < end {
                count += 1;
                if count > limit {
                    return Err(Error::TooManyParams(limit));
                }

                // `&` and `=` are ASCII, so every split lands on a char boundary
                let segment = &input[start..end];
                match memchr(b'=', segment.as_bytes()) {
                    Some(eq) => result.add_param(&segment[..eq], Some(&segment[eq + 1..])),
                    None => result.add_param(segment, None),
                }
            }

            start = end + 1;
        }

        Ok(())
    }
}

/// A collection that parsed `key=value` pairs can be pushed into.
pub trait QueryCollector<'a>
where
    Self: Sized,
{
    fn add_param(&mut self, key: &'a str, value: Option<&'a str>);

    fn with_capacity(capacity: usize) -> Self;
}

// Owned map used by `Request`; a repeated key keeps the last value
impl<'a> QueryCollector<'a> for Params {
    #[inline(always)]
    fn add_param(&mut self, key: &'a str, value: Option<&'a str>) {
        self.insert(key.to_owned(), value.map(str::to_owned));
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Params::with_capacity(capacity)
    }
}

// Borrowed pairs in input order, duplicates kept
impl<'a> QueryCollector<'a> for Vec<(&'a str, Option<&'a str>)> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a str, value: Option<&'a str>) {
        self.push((key, value));
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}
