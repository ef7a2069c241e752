use std::iter::FusedIterator;
use turf_core::{Collection, Result, RowIter};

/// Lazy sequence over every value of a collection, in key order
///
/// Values are decoded as the sequence advances and never enter the value
/// cache. The first error ends the sequence.
pub struct ValuesSequence<'t, C: Collection> {
    collection: &'t C,
    rows: RowIter<'t>,
    done: bool,
}

impl<'t, C: Collection> ValuesSequence<'t, C> {
    pub(crate) fn new(collection: &'t C, rows: RowIter<'t>) -> Self {
        ValuesSequence {
            collection,
            rows,
            done: false,
        }
    }

    /// Keep pairing each value with its key
    pub fn with_keys(self) -> KeyedValuesSequence<'t, C> {
        KeyedValuesSequence { inner: self }
    }

    fn next_entry(&mut self) -> Option<Result<(String, C::Value)>> {
        if self.done {
            return None;
        }
        let Some(entry) = self.rows.next() else {
            self.done = true;
            return None;
        };
        let decoded = match entry {
            Ok((key, row)) => self
                .collection
                .deserialize_value(&row.data)
                .map(|value| (key, value)),
            Err(e) => Err(e),
        };
        if decoded.is_err() {
            self.done = true;
        }
        Some(decoded)
    }
}

impl<C: Collection> Iterator for ValuesSequence<'_, C> {
    type Item = Result<C::Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().map(|r| r.map(|(_, value)| value))
    }
}

impl<C: Collection> FusedIterator for ValuesSequence<'_, C> {}

/// `ValuesSequence` yielding `(key, value)` pairs
pub struct KeyedValuesSequence<'t, C: Collection> {
    inner: ValuesSequence<'t, C>,
}

impl<C: Collection> Iterator for KeyedValuesSequence<'_, C> {
    type Item = Result<(String, C::Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next_entry()
    }
}

impl<C: Collection> FusedIterator for KeyedValuesSequence<'_, C> {}
