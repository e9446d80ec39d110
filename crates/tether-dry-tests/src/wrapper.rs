// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Store wrapper that records what the store tells the host.

use std::cell::RefCell;
use std::collections::BTreeSet;

use tether_core::{ChangeKind, Identifier, RecordRef, StoreWrapper};

/// One `notify_change` call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Notification {
    /// Record that changed.
    pub identifier: Identifier,
    /// What changed.
    pub kind: ChangeKind,
    /// Attribute or relationship name, when given.
    pub key: Option<String>,
}

/// [`StoreWrapper`] that logs notifications and disconnects, and reports
/// records as in use only when a test marks them.
///
/// Share it as `Rc<RecordingWrapper>` and hand a clone to the store:
///
/// ```
/// use std::rc::Rc;
/// use tether_core::{Store, StoreConfig, StoreWrapper};
/// use tether_dry_tests::{schemas, RecordingWrapper};
///
/// let wrapper = Rc::new(RecordingWrapper::new());
/// let store = Store::new(
///     Rc::new(schemas::blog()),
///     wrapper.clone() as Rc<dyn StoreWrapper>,
///     StoreConfig::default(),
/// );
/// assert!(wrapper.notifications().is_empty());
/// # drop(store);
/// ```
#[derive(Debug, Default)]
pub struct RecordingWrapper {
    notifications: RefCell<Vec<Notification>>,
    in_use: RefCell<BTreeSet<Identifier>>,
    disconnected: RefCell<Vec<Identifier>>,
}

impl RecordingWrapper {
    /// Empty log, nothing in use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `identifier` as referenced (or not) by a live record object.
    pub fn set_in_use(&self, identifier: Identifier, in_use: bool) {
        let mut set = self.in_use.borrow_mut();
        if in_use {
            set.insert(identifier);
        } else {
            set.remove(&identifier);
        }
    }

    /// Every notification so far, in order.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.borrow().clone()
    }

    /// Notifications for one record and key.
    pub fn notifications_for(&self, identifier: Identifier, key: &str) -> usize {
        self.notifications
            .borrow()
            .iter()
            .filter(|n| n.identifier == identifier && n.key.as_deref() == Some(key))
            .count()
    }

    /// Records released so far, in order.
    pub fn disconnected(&self) -> Vec<Identifier> {
        self.disconnected.borrow().clone()
    }

    /// Clears the notification and disconnect logs.
    pub fn clear(&self) {
        self.notifications.borrow_mut().clear();
        self.disconnected.borrow_mut().clear();
    }
}

impl StoreWrapper for RecordingWrapper {
    fn notify_change(&self, record: RecordRef<'_>, kind: ChangeKind, key: Option<&str>) {
        self.notifications.borrow_mut().push(Notification {
            identifier: record.identifier,
            kind,
            key: key.map(str::to_owned),
        });
    }

    fn is_record_in_use(&self, record: RecordRef<'_>) -> bool {
        self.in_use.borrow().contains(&record.identifier)
    }

    fn disconnect_record(&self, record: RecordRef<'_>) {
        self.disconnected.borrow_mut().push(record.identifier);
    }
}
