//! Optimistic reordering with rollback, shared by every draggable list.
//!
//! An [`OrderedList`] keeps the displayed order and the last confirmed
//! order. Reorders apply to the displayed order immediately; a persistence
//! call follows and either promotes what it sent to confirmed or restores
//! confirmed.
//!
//! Reorders that arrive while a call is in flight are queued and
//! serialized: they update the displayed order at once and mark the list
//! dirty. At most one call is outstanding per list. After a success the
//! latest displayed order is sent in one follow-up call; after a failure
//! the displayed order reverts to confirmed, dropping the queued reorders.
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};

use crate::backend::ReorderService;
use crate::error::{IndexOutOfBounds, OrderError, PersistError};
use crate::model::{AssetId, MediaAsset, OrderAssignment};

/// Anything that can sit in an [`OrderedList`].
pub trait OrderedItem: Clone {
    type Id: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    fn item_id(&self) -> Self::Id;

    /// Record the item's position. Items without an order field ignore it.
    fn set_order(&mut self, _order: u32) {}
}

impl OrderedItem for MediaAsset {
    type Id = AssetId;

    fn item_id(&self) -> AssetId {
        self.id.clone()
    }

    fn set_order(&mut self, order: u32) {
        self.display_order = order;
    }
}

/// Remove the element at `from` and insert it at `to`.
pub fn move_element<T>(items: &mut Vec<T>, from: usize, to: usize) -> Result<(), IndexOutOfBounds> {
    let len = items.len();
    for index in [from, to] {
        if index >= len {
            return Err(IndexOutOfBounds { index, len });
        }
    }
    let item = items.remove(from);
    items.insert(to, item);
    Ok(())
}

/// `{item_id, new_order}` pairs numbering `ids` from 0.
pub fn sequential_assignments<Id>(ids: impl IntoIterator<Item = Id>) -> Vec<OrderAssignment<Id>> {
    ids.into_iter()
        .enumerate()
        .map(|(index, item_id)| OrderAssignment {
            item_id,
            new_order: index as u32,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// displayed == confirmed
    Stable,
    /// displayed changed, no call issued yet
    Reordering,
    /// a persistence call is outstanding
    Reconciling,
}

/// An issued persistence call. Handed back to [`OrderedList::settle`].
#[derive(Debug, Clone)]
pub struct PersistTicket<T: OrderedItem> {
    generation: u64,
    sent: Vec<T>,
    pub assignments: Vec<OrderAssignment<T::Id>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Confirmed; `more` is set when reorders queued during the call still
    /// need to be sent.
    Confirmed { more: bool },
    RolledBack(PersistError),
    /// Stale ticket or disposed list; nothing changed.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct OrderedList<T: OrderedItem> {
    displayed: Vec<T>,
    confirmed: Vec<T>,
    state: SyncState,
    in_flight: Option<u64>,
    dirty: bool,
    generation: u64,
    disposed: bool,
}

impl<T: OrderedItem> OrderedList<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            displayed: items.clone(),
            confirmed: items,
            state: SyncState::Stable,
            in_flight: None,
            dirty: false,
            generation: 0,
            disposed: false,
        }
    }

    pub fn displayed(&self) -> &[T] {
        &self.displayed
    }

    pub fn confirmed(&self) -> &[T] {
        &self.confirmed
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Move-element transform on the displayed order; confirmed is untouched.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<(), OrderError> {
        if self.disposed {
            return Err(OrderError::Disposed);
        }
        move_element(&mut self.displayed, from, to)?;
        for (index, item) in self.displayed.iter_mut().enumerate() {
            item.set_order(index as u32);
        }
        match self.state {
            SyncState::Stable => self.state = SyncState::Reordering,
            SyncState::Reordering => {}
            SyncState::Reconciling => self.dirty = true,
        }
        Ok(())
    }

    /// `Reordering → Reconciling`. Returns `None` when nothing needs to be
    /// sent or a call is already outstanding.
    pub fn begin_persist(&mut self) -> Option<PersistTicket<T>> {
        if self.disposed || self.state != SyncState::Reordering {
            return None;
        }
        self.generation += 1;
        self.in_flight = Some(self.generation);
        self.state = SyncState::Reconciling;
        self.dirty = false;
        Some(PersistTicket {
            generation: self.generation,
            sent: self.displayed.clone(),
            assignments: sequential_assignments(self.displayed.iter().map(T::item_id)),
        })
    }

    /// Apply the outcome of the call issued with `ticket`.
    pub fn settle(&mut self, ticket: PersistTicket<T>, result: Result<(), PersistError>) -> Settlement {
        if self.disposed || self.in_flight != Some(ticket.generation) {
            return Settlement::Ignored;
        }
        self.in_flight = None;
        match result {
            Ok(()) => {
                self.confirmed = ticket.sent;
                let more = std::mem::take(&mut self.dirty);
                self.state = if more {
                    SyncState::Reordering
                } else {
                    SyncState::Stable
                };
                Settlement::Confirmed { more }
            }
            Err(err) => {
                self.displayed = self.confirmed.clone();
                self.dirty = false;
                self.state = SyncState::Stable;
                Settlement::RolledBack(err)
            }
        }
    }

    /// Give up on the call issued under `generation` without a result. The
    /// displayed order stays and is sent again by the next persist.
    /// Returns false if that call was no longer the outstanding one.
    pub fn abandon(&mut self, generation: u64) -> bool {
        if self.disposed || self.in_flight != Some(generation) {
            return false;
        }
        self.in_flight = None;
        self.dirty = false;
        self.state = SyncState::Reordering;
        true
    }

    /// Adopt authoritative state, e.g. after a re-fetch. Any outstanding
    /// call's result will be ignored.
    pub fn replace_confirmed(&mut self, items: Vec<T>) {
        self.displayed = items.clone();
        self.confirmed = items;
        self.state = SyncState::Stable;
        self.in_flight = None;
        self.dirty = false;
    }

    /// Soft cancellation: later results are ignored and reorders refused.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.in_flight = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to persist.
    Idle,
    /// Another call is in flight and will pick this change up.
    Queued,
    Confirmed,
    /// Displayed order was restored; the consumer should show an error and
    /// may re-fetch.
    RolledBack(PersistError),
    /// The list was disposed or replaced while the call was out.
    Ignored,
}

/// Returns an outstanding call to its list if the `sync` future is dropped
/// while awaiting it.
struct CallGuard<'a, T: OrderedItem> {
    list: &'a Mutex<OrderedList<T>>,
    generation: Option<u64>,
}

impl<T: OrderedItem> Drop for CallGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(generation) = self.generation.take() {
            let mut list = self.list.lock().unwrap_or_else(PoisonError::into_inner);
            if list.abandon(generation) {
                debug!(generation, "persistence call abandoned; order will be resent");
            }
        }
    }
}

/// Drives an [`OrderedList`] against a [`ReorderService`].
pub struct OrderSynchronizer<T: OrderedItem> {
    list_key: String,
    list: Arc<Mutex<OrderedList<T>>>,
    service: Arc<dyn ReorderService<T::Id>>,
}

impl<T: OrderedItem> Clone for OrderSynchronizer<T> {
    fn clone(&self) -> Self {
        Self {
            list_key: self.list_key.clone(),
            list: self.list.clone(),
            service: self.service.clone(),
        }
    }
}

impl<T> OrderSynchronizer<T>
where
    T: OrderedItem + Send,
{
    pub fn new(list_key: impl Into<String>, items: Vec<T>, service: Arc<dyn ReorderService<T::Id>>) -> Self {
        Self {
            list_key: list_key.into(),
            list: Arc::new(Mutex::new(OrderedList::new(items))),
            service,
        }
    }

    fn lock(&self) -> MutexGuard<'_, OrderedList<T>> {
        self.list.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn displayed(&self) -> Vec<T> {
        self.lock().displayed().to_vec()
    }

    pub fn confirmed(&self) -> Vec<T> {
        self.lock().confirmed().to_vec()
    }

    pub fn state(&self) -> SyncState {
        self.lock().state()
    }

    /// Synchronous displayed-order update.
    pub fn reorder(&self, from: usize, to: usize) -> Result<(), OrderError> {
        self.lock().reorder(from, to)?;
        debug!(list = %self.list_key, from, to, "displayed order updated");
        Ok(())
    }

    /// Persist the displayed order. Returns `Queued` at once if a call is
    /// already outstanding; the caller holding that call sends the update.
    /// Dropping the returned future mid-call puts the list back into
    /// `Reordering` so a later `sync` resends.
    #[instrument(skip_all, fields(list = %self.list_key))]
    pub async fn sync(&self) -> SyncOutcome {
        let mut confirmed = false;
        loop {
            let ticket = {
                let mut list = self.lock();
                if list.state() == SyncState::Reconciling {
                    return SyncOutcome::Queued;
                }
                match list.begin_persist() {
                    Some(ticket) => ticket,
                    None if list.is_disposed() => return SyncOutcome::Ignored,
                    None if confirmed => return SyncOutcome::Confirmed,
                    None => return SyncOutcome::Idle,
                }
            };

            let mut guard = CallGuard {
                list: &self.list,
                generation: Some(ticket.generation),
            };
            let result = self
                .service
                .persist_order(&self.list_key, &ticket.assignments)
                .await;
            guard.generation = None;

            let settlement = self.lock().settle(ticket, result);
            match settlement {
                Settlement::Confirmed { more: true } => {
                    confirmed = true;
                    debug!("order confirmed; sending queued reorder");
                }
                Settlement::Confirmed { more: false } => {
                    info!("order confirmed");
                    return SyncOutcome::Confirmed;
                }
                Settlement::RolledBack(err) => {
                    warn!(%err, "order persistence failed; rolled back");
                    return SyncOutcome::RolledBack(err);
                }
                Settlement::Ignored => {
                    debug!("late persistence result ignored");
                    return SyncOutcome::Ignored;
                }
            }
        }
    }

    pub async fn reorder_and_sync(&self, from: usize, to: usize) -> Result<SyncOutcome, OrderError> {
        self.reorder(from, to)?;
        Ok(self.sync().await)
    }

    pub fn replace_confirmed(&self, items: Vec<T>) {
        self.lock().replace_confirmed(items);
    }

    pub fn dispose(&self) {
        self.lock().dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row(&'static str);

    impl OrderedItem for Row {
        type Id = &'static str;

        fn item_id(&self) -> &'static str {
            self.0
        }
    }

    fn list() -> OrderedList<Row> {
        OrderedList::new(vec![Row("a"), Row("b"), Row("c"), Row("d")])
    }

    fn ids(items: &[Row]) -> Vec<&'static str> {
        items.iter().map(|r| r.0).collect()
    }

    #[test]
    fn move_element_moves_and_bounds_checks() {
        let mut v = vec![1, 2, 3, 4];
        move_element(&mut v, 3, 0).unwrap();
        assert_eq!(v, vec![4, 1, 2, 3]);
        move_element(&mut v, 0, 3).unwrap();
        assert_eq!(v, vec![1, 2, 3, 4]);
        assert_eq!(
            move_element(&mut v, 4, 0).unwrap_err(),
            IndexOutOfBounds { index: 4, len: 4 }
        );
        assert!(move_element(&mut Vec::<u8>::new(), 0, 0).is_err());
    }

    #[test]
    fn reorder_updates_displayed_only() {
        let mut l = list();
        l.reorder(3, 0).unwrap();
        assert_eq!(l.state(), SyncState::Reordering);
        assert_eq!(ids(l.displayed()), vec!["d", "a", "b", "c"]);
        assert_eq!(ids(l.confirmed()), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn success_promotes_and_failure_restores() {
        let mut l = list();
        l.reorder(3, 0).unwrap();
        let ticket = l.begin_persist().unwrap();
        assert_eq!(l.state(), SyncState::Reconciling);
        let orders: Vec<_> = ticket
            .assignments
            .iter()
            .map(|a| (a.item_id, a.new_order))
            .collect();
        assert_eq!(orders, vec![("d", 0), ("a", 1), ("b", 2), ("c", 3)]);
        assert_eq!(l.settle(ticket, Ok(())), Settlement::Confirmed { more: false });
        assert_eq!(l.state(), SyncState::Stable);
        assert_eq!(ids(l.confirmed()), vec!["d", "a", "b", "c"]);

        l.reorder(0, 3).unwrap();
        let ticket = l.begin_persist().unwrap();
        let err = PersistError::Transport("offline".into());
        assert_eq!(l.settle(ticket, Err(err.clone())), Settlement::RolledBack(err));
        assert_eq!(ids(l.displayed()), vec!["d", "a", "b", "c"]);
        assert_eq!(l.state(), SyncState::Stable);
    }

    #[test]
    fn reorder_during_flight_is_queued_then_sent() {
        let mut l = list();
        l.reorder(0, 1).unwrap();
        let first = l.begin_persist().unwrap();
        l.reorder(3, 0).unwrap();
        assert_eq!(l.state(), SyncState::Reconciling);
        assert!(l.begin_persist().is_none());

        assert_eq!(l.settle(first, Ok(())), Settlement::Confirmed { more: true });
        assert_eq!(ids(l.confirmed()), vec!["b", "a", "c", "d"]);
        assert_eq!(l.state(), SyncState::Reordering);

        let second = l.begin_persist().unwrap();
        assert_eq!(second.assignments[0].item_id, "d");
        assert_eq!(l.settle(second, Ok(())), Settlement::Confirmed { more: false });
        assert_eq!(ids(l.confirmed()), vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn failure_drops_queued_reorders() {
        let mut l = list();
        l.reorder(0, 1).unwrap();
        let first = l.begin_persist().unwrap();
        l.reorder(3, 0).unwrap();
        let settled = l.settle(first, Err(PersistError::Transport("x".into())));
        assert!(matches!(settled, Settlement::RolledBack(_)));
        assert_eq!(ids(l.displayed()), vec!["a", "b", "c", "d"]);
        assert!(l.begin_persist().is_none());
    }

    #[test]
    fn stale_and_disposed_results_are_ignored() {
        let mut l = list();
        l.reorder(0, 1).unwrap();
        let ticket = l.begin_persist().unwrap();
        l.replace_confirmed(vec![Row("z")]);
        assert_eq!(l.settle(ticket, Ok(())), Settlement::Ignored);
        assert_eq!(ids(l.confirmed()), vec!["z"]);

        let mut l = list();
        l.reorder(0, 1).unwrap();
        let ticket = l.begin_persist().unwrap();
        l.dispose();
        assert_eq!(l.settle(ticket, Err(PersistError::Transport("x".into()))), Settlement::Ignored);
        assert_eq!(l.reorder(0, 1), Err(OrderError::Disposed));
    }

    #[test]
    fn abandoned_call_can_be_reissued() {
        let mut l = list();
        l.reorder(3, 0).unwrap();
        let ticket = l.begin_persist().unwrap();
        assert!(l.abandon(ticket.generation));
        assert!(!l.abandon(ticket.generation));
        assert_eq!(l.state(), SyncState::Reordering);

        let retry = l.begin_persist().unwrap();
        assert_eq!(retry.assignments[0].item_id, "d");
        // the abandoned call's late answer no longer counts
        assert_eq!(l.settle(ticket, Ok(())), Settlement::Ignored);
        assert_eq!(l.settle(retry, Ok(())), Settlement::Confirmed { more: false });
        assert_eq!(ids(l.confirmed()), vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn out_of_bounds_reorder_changes_nothing() {
        let mut l = list();
        assert!(matches!(l.reorder(9, 0), Err(OrderError::IndexOutOfBounds(_))));
        assert_eq!(l.state(), SyncState::Stable);
        assert!(l.begin_persist().is_none());
    }
}
