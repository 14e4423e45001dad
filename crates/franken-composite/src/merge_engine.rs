//! Prioritized merge of partial sources into one materialized view.
//!
//! A `MergeEngine` keeps an ordered entry list (index 0 is the highest
//! priority) and a long-lived `CombinedView` holding, for every key defined by
//! any entry, the value from the earliest entry that defines it.  The view is
//! rebuilt in a single pass after every list mutation and then handed to a
//! `RecomputeHook`, which applies cross-cutting state (prototype, tombstones,
//! extensibility) before anyone can observe the view again.
//!
//! `reserved_insert_at` pins the entries below it: overrides are inserted at
//! that index, so they outrank everything except the pinned prefix.
//!
//! Recomputation is O(total properties across entries).  Composites carry a
//! small number of entries, so no incremental diffing is attempted.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::CompositeError;

// ---------------------------------------------------------------------------
// MergeEntry — what can be merged
// ---------------------------------------------------------------------------

/// A partial source that contributes `(key, value)` pairs to a merge.
///
/// Entries are matched by identity for removal, never structurally.
pub trait MergeEntry: Clone {
    type Key: Ord + Clone;
    type Value: Clone;

    /// Are `self` and `other` the same entry (identity, not contents)?
    fn same_entry(&self, other: &Self) -> bool;

    /// The pairs this entry currently contributes.
    fn merge_pairs(&self) -> Vec<(Self::Key, Self::Value)>;
}

// ---------------------------------------------------------------------------
// CombinedView — the materialized merge result
// ---------------------------------------------------------------------------

/// Materialized merge result plus hook-maintained shape.
#[derive(Debug, Clone, Default)]
pub struct CombinedView<K, V, S> {
    values: BTreeMap<K, V>,
    shape: S,
    revision: u64,
}

impl<K: Ord, V, S> CombinedView<K, V, S> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// State written by the recompute hook.
    pub fn shape(&self) -> &S {
        &self.shape
    }

    pub fn shape_mut(&mut self) -> &mut S {
        &mut self.shape
    }

    /// Number of recomputations so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

// ---------------------------------------------------------------------------
// RecomputeHook — post-merge adjustments
// ---------------------------------------------------------------------------

/// Runs after every recomputation, with exclusive access to the view.
pub trait RecomputeHook<K, V> {
    type Shape: Default;

    fn on_recompute(&mut self, view: &mut CombinedView<K, V, Self::Shape>);
}

/// Hook for engines with no cross-cutting state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHook;

impl<K, V> RecomputeHook<K, V> for NoHook {
    type Shape = ();

    fn on_recompute(&mut self, _view: &mut CombinedView<K, V, ()>) {}
}

// ---------------------------------------------------------------------------
// MergeEngine
// ---------------------------------------------------------------------------

type ViewOf<E, H> = CombinedView<
    <E as MergeEntry>::Key,
    <E as MergeEntry>::Value,
    <H as RecomputeHook<<E as MergeEntry>::Key, <E as MergeEntry>::Value>>::Shape,
>;

/// Ordered entry list with a materialized first-writer-wins view.
pub struct MergeEngine<E, H = NoHook>
where
    E: MergeEntry,
    H: RecomputeHook<E::Key, E::Value>,
{
    entries: Vec<E>,
    reserved_insert_at: usize,
    combined: ViewOf<E, H>,
    hook: H,
}

impl<E, H> MergeEngine<E, H>
where
    E: MergeEntry,
    H: RecomputeHook<E::Key, E::Value>,
{
    /// Build the engine and its initial view.
    ///
    /// `reserved_insert_at` must not exceed the initial entry count.
    pub fn new(
        entries: Vec<E>,
        reserved_insert_at: usize,
        hook: H,
    ) -> Result<Self, CompositeError> {
        if reserved_insert_at > entries.len() {
            return Err(CompositeError::ReservedIndexOutOfRange {
                index: reserved_insert_at,
                len: entries.len(),
            });
        }
        let mut engine = Self {
            entries,
            reserved_insert_at,
            combined: CombinedView {
                values: BTreeMap::new(),
                shape: H::Shape::default(),
                revision: 0,
            },
            hook,
        };
        engine.recompute();
        Ok(engine)
    }

    /// Insert `entry` at the reserved index: it outranks every entry except
    /// the pinned prefix.
    pub fn add_override(&mut self, entry: E) {
        let at = self.reserved_insert_at.min(self.entries.len());
        self.entries.insert(at, entry);
        self.recompute();
    }

    /// Append `entry`: visible only where nothing else defines a key.
    pub fn add_fallback(&mut self, entry: E) {
        self.entries.push(entry);
        self.recompute();
    }

    /// Remove the first entry identical to `entry`. Returns `false` (and skips
    /// the recompute) when it is not in the list.
    pub fn remove_entry(&mut self, entry: &E) -> bool {
        let Some(position) = self.entries.iter().position(|e| e.same_entry(entry)) else {
            return false;
        };
        self.entries.remove(position);
        self.recompute();
        true
    }

    /// Re-derive the view from the current list and re-run the hook.
    pub fn force_update(&mut self) {
        self.recompute();
    }

    /// Defensive copy of the entry list, in priority order.
    pub fn current_list(&self) -> Vec<E> {
        self.entries.clone()
    }

    /// Borrowed view of the entry list, in priority order.
    pub fn entries(&self) -> &[E] {
        &self.entries
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn reserved_insert_at(&self) -> usize {
        self.reserved_insert_at
    }

    pub fn combined(&self) -> &ViewOf<E, H> {
        &self.combined
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    /// Mutable hook state. Call [`force_update`](Self::force_update) afterwards
    /// so the view reflects the change.
    pub fn hook_mut(&mut self) -> &mut H {
        &mut self.hook
    }

    fn recompute(&mut self) {
        self.combined.values.clear();
        for entry in &self.entries {
            for (key, value) in entry.merge_pairs() {
                self.combined.values.entry(key).or_insert(value);
            }
        }
        self.combined.revision += 1;
        self.hook.on_recompute(&mut self.combined);
    }
}

impl<E, H> fmt::Debug for MergeEngine<E, H>
where
    E: MergeEntry,
    H: RecomputeHook<E::Key, E::Value>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeEngine")
            .field("entries", &self.entries.len())
            .field("reserved_insert_at", &self.reserved_insert_at)
            .field("keys", &self.combined.len())
            .field("revision", &self.combined.revision)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    /// Identity-compared test entry.
    #[derive(Debug, Clone)]
    struct Layer(Rc<Vec<(&'static str, i64)>>);

    impl Layer {
        fn new(pairs: &[(&'static str, i64)]) -> Self {
            Self(Rc::new(pairs.to_vec()))
        }
    }

    impl MergeEntry for Layer {
        type Key = &'static str;
        type Value = i64;

        fn same_entry(&self, other: &Self) -> bool {
            Rc::ptr_eq(&self.0, &other.0)
        }

        fn merge_pairs(&self) -> Vec<(&'static str, i64)> {
            self.0.as_ref().clone()
        }
    }

    /// Records how often it ran and how many keys it saw.
    #[derive(Debug, Default)]
    struct CountingHook {
        runs: u32,
    }

    impl RecomputeHook<&'static str, i64> for CountingHook {
        type Shape = usize;

        fn on_recompute(&mut self, view: &mut CombinedView<&'static str, i64, usize>) {
            self.runs += 1;
            *view.shape_mut() = view.len();
        }
    }

    fn engine(layers: Vec<Layer>, reserved: usize) -> MergeEngine<Layer> {
        MergeEngine::new(layers, reserved, NoHook).expect("engine")
    }

    #[test]
    fn first_entry_wins_per_key() {
        let e = engine(
            vec![Layer::new(&[("a", 1)]), Layer::new(&[("a", 2), ("b", 3)])],
            0,
        );
        assert_eq!(e.combined().get(&"a"), Some(&1));
        assert_eq!(e.combined().get(&"b"), Some(&3));
        assert_eq!(e.combined().len(), 2);
    }

    #[test]
    fn override_respects_reserved_prefix() {
        let pinned = Layer::new(&[("a", 1)]);
        let mut e = engine(vec![pinned], 1);
        e.add_override(Layer::new(&[("a", 9), ("b", 9)]));
        assert_eq!(e.combined().get(&"a"), Some(&1));
        assert_eq!(e.combined().get(&"b"), Some(&9));
    }

    #[test]
    fn later_override_outranks_earlier_override() {
        let mut e = engine(vec![], 0);
        e.add_override(Layer::new(&[("a", 1)]));
        e.add_override(Layer::new(&[("a", 2)]));
        assert_eq!(e.combined().get(&"a"), Some(&2));
    }

    #[test]
    fn fallback_only_fills_gaps() {
        let mut e = engine(vec![Layer::new(&[("a", 1)])], 0);
        e.add_fallback(Layer::new(&[("a", 5), ("z", 26)]));
        assert_eq!(e.combined().get(&"a"), Some(&1));
        assert_eq!(e.combined().get(&"z"), Some(&26));
    }

    #[test]
    fn remove_is_identity_based_and_reports_misses() {
        let a = Layer::new(&[("k", 1)]);
        let twin = Layer::new(&[("k", 1)]);
        let mut e = engine(vec![a.clone()], 0);
        assert!(!e.remove_entry(&twin));
        assert!(e.remove_entry(&a));
        assert!(!e.remove_entry(&a));
        assert!(e.combined().is_empty());
    }

    #[test]
    fn duplicate_handles_are_distinct_members() {
        let a = Layer::new(&[("k", 1)]);
        let mut e = engine(vec![a.clone(), a.clone()], 0);
        assert!(e.remove_entry(&a));
        assert_eq!(e.entry_count(), 1);
        assert_eq!(e.combined().get(&"k"), Some(&1));
    }

    #[test]
    fn removed_keys_disappear_from_view() {
        let extra = Layer::new(&[("gone", 1)]);
        let mut e = engine(vec![Layer::new(&[("kept", 0)])], 0);
        e.add_fallback(extra.clone());
        assert!(e.combined().contains_key(&"gone"));
        e.remove_entry(&extra);
        assert!(!e.combined().contains_key(&"gone"));
    }

    #[test]
    fn reserved_index_beyond_list_is_rejected() {
        let err = MergeEngine::<Layer>::new(vec![], 1, NoHook).expect_err("out of range");
        assert_eq!(err, CompositeError::ReservedIndexOutOfRange { index: 1, len: 0 });
    }

    #[test]
    fn override_clamps_when_prefix_was_removed() {
        let pinned = Layer::new(&[("a", 1)]);
        let mut e = engine(vec![pinned.clone()], 1);
        e.remove_entry(&pinned);
        e.add_override(Layer::new(&[("a", 2)]));
        assert_eq!(e.combined().get(&"a"), Some(&2));
    }

    #[test]
    fn hook_runs_on_every_recompute_including_force_update() {
        let layer = Layer::new(&[("a", 1)]);
        let mut e = MergeEngine::new(vec![layer.clone()], 0, CountingHook::default())
            .expect("engine");
        assert_eq!(e.hook().runs, 1);
        e.add_fallback(Layer::new(&[("b", 2)]));
        e.force_update();
        assert!(!e.remove_entry(&Layer::new(&[])));
        assert_eq!(e.hook().runs, 3);
        assert_eq!(*e.combined().shape(), 2);
        assert_eq!(e.combined().revision(), 3);
    }

    #[test]
    fn current_list_is_a_snapshot() {
        let a = Layer::new(&[("a", 1)]);
        let mut e = engine(vec![a.clone()], 0);
        let snapshot = e.current_list();
        e.add_fallback(Layer::new(&[("b", 2)]));
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].same_entry(&a));
        assert_eq!(e.current_list().len(), 2);
    }
}
