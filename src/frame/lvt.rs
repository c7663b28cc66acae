use std::collections::BTreeMap;

use super::{FrameError, SizedValue};

/// The local-variable table of an [`AbstractFrame`](super::AbstractFrame).
///
/// A sparse mapping `index -> SizedValue<T>`. The index following a
/// two-slot store is observationally "inaccessible until overwritten":
/// this type does not enforce that on `put`; the interpreter's store
/// opcodes are responsible for clearing it, since the *value*, not the
/// table, is the source of truth for occupancy.
#[derive(Debug, Clone)]
pub struct LocalVariableTable<T>(BTreeMap<u16, SizedValue<T>>);

impl<T> LocalVariableTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Reads the value at `index`.
    ///
    /// # Errors
    /// Returns [`FrameError::MissingLocal`] if no value is stored there.
    pub fn get(&self, index: u16) -> Result<&SizedValue<T>, FrameError> {
        self.0.get(&index).ok_or(FrameError::MissingLocal(index))
    }

    /// Writes (overwriting any prior value) at `index`.
    pub fn put(&mut self, index: u16, value: SizedValue<T>) {
        self.0.insert(index, value);
    }

    /// Removes any value stored at `index`, e.g. to model the
    /// "inaccessible until overwritten" slot after a two-slot store.
    pub fn clear(&mut self, index: u16) {
        self.0.remove(&index);
    }

    /// Iterates over the defined indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &SizedValue<T>)> {
        self.0.iter().map(|(&idx, v)| (idx, v))
    }

    /// Whether `index` has a stored value.
    #[must_use]
    pub fn contains(&self, index: u16) -> bool {
        self.0.contains_key(&index)
    }
}

impl<T: Clone> LocalVariableTable<T> {
    /// Merges two tables over the *intersection* of defined indices,
    /// applying `merge_fn` pointwise. Indices defined in only one of the
    /// two tables are dropped from the result, since merge is defined only
    /// on the intersection.
    #[must_use]
    pub fn merge(&self, other: &Self, merge_fn: &mut impl FnMut(&T, &T) -> T) -> Self {
        let merged = self
            .0
            .iter()
            .filter_map(|(&idx, a)| {
                let b = other.0.get(&idx)?;
                if a.slots != b.slots {
                    // A slot-width mismatch on an index outside the operand
                    // stack is not itself a spec'd error class; the safest
                    // and most conservative resolution is to drop the
                    // index from the merged table rather than desync the
                    // two frames' local layouts.
                    return None;
                }
                Some((idx, SizedValue::new(merge_fn(&a.value, &b.value), a.slots)))
            })
            .collect();
        Self(merged)
    }
}

impl<T> Default for LocalVariableTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq> PartialEq for LocalVariableTable<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn get_missing_fails() {
        let lvt: LocalVariableTable<i32> = LocalVariableTable::new();
        assert_eq!(lvt.get(0), Err(FrameError::MissingLocal(0)));
    }

    #[test]
    fn put_overwrites() {
        let mut lvt: LocalVariableTable<i32> = LocalVariableTable::new();
        lvt.put(0, SizedValue::one(1));
        lvt.put(0, SizedValue::one(2));
        assert_eq!(lvt.get(0).unwrap().value, 2);
    }

    #[test]
    fn merge_takes_intersection() {
        let mut a: LocalVariableTable<i32> = LocalVariableTable::new();
        a.put(0, SizedValue::one(1));
        a.put(1, SizedValue::one(2));
        let mut b: LocalVariableTable<i32> = LocalVariableTable::new();
        b.put(0, SizedValue::one(10));
        let merged = a.merge(&b, &mut |x, y| x + y);
        assert_eq!(merged.get(0).unwrap().value, 11);
        assert_eq!(merged.get(1), Err(FrameError::MissingLocal(1)));
    }
}
