//! Observer contracts used to keep calibration lazy.
//!
//! Components that own configuration (layouts, painters, the selection model)
//! hold a [`Listeners`] registry and fire it whenever their settings change. The
//! pane registers an [`Invalidation`] with all of them, so a single flag decides
//! whether the next paint has to recalibrate.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Fired by a layout strategy when its own configuration changes.
pub trait TreeLayoutListener {
    fn tree_layout_changed(&self);
}

/// Fired by painters. The three events mirror what a painter can change: what
/// it draws, how it draws it, or which attributes it can draw.
pub trait PainterListener {
    fn painter_changed(&self);

    fn painter_settings_changed(&self) {
        self.painter_changed();
    }

    fn attributes_changed(&self) {
        self.painter_changed();
    }
}

pub trait TreeSelectionListener {
    fn selection_changed(&self);
}

/// Fired by the pane when a user-facing setting changed, so controls can refresh.
pub trait TreePaneListener {
    fn tree_pane_settings_changed(&self);
}

/// Registry of weakly held listeners.
///
/// Listeners that have been dropped are skipped and pruned when the registry
/// next fires.
pub struct Listeners<L: ?Sized> {
    entries: Vec<Weak<L>>,
}

impl<L: ?Sized> Listeners<L> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, listener: Weak<L>) {
        self.entries.push(listener);
    }

    pub fn fire(&mut self, mut event: impl FnMut(&L)) {
        self.entries.retain(|entry| entry.strong_count() > 0);
        for entry in &self.entries {
            if let Some(listener) = entry.upgrade() {
                event(&listener);
            }
        }
    }
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> Clone for Listeners<L> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<L: ?Sized> fmt::Debug for Listeners<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("registered", &self.entries.len())
            .finish()
    }
}

/// Shared calibration and repaint flags.
#[derive(Debug)]
pub struct Invalidation {
    calibrated: Cell<bool>,
    repaint: Cell<bool>,
}

impl Invalidation {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            calibrated: Cell::new(false),
            repaint: Cell::new(true),
        })
    }

    /// Mark calibration stale and request a repaint.
    pub fn invalidate(&self) {
        self.calibrated.set(false);
        self.repaint.set(true);
    }

    /// Request a repaint without touching calibration.
    pub fn request_repaint(&self) {
        self.repaint.set(true);
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated.get()
    }

    pub fn mark_calibrated(&self) {
        self.calibrated.set(true);
    }

    /// Consume the pending repaint request.
    pub fn take_repaint(&self) -> bool {
        self.repaint.replace(false)
    }
}

impl TreeLayoutListener for Invalidation {
    fn tree_layout_changed(&self) {
        self.invalidate();
    }
}

impl PainterListener for Invalidation {
    fn painter_changed(&self) {
        self.invalidate();
    }
}

impl TreeSelectionListener for Invalidation {
    fn selection_changed(&self) {
        self.request_repaint();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(Cell<usize>);

    impl TreeSelectionListener for Counter {
        fn selection_changed(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn dropped_listeners_are_pruned() {
        let mut listeners: Listeners<dyn TreeSelectionListener> = Listeners::new();
        let kept = Rc::new(Counter(Cell::new(0)));
        let dropped = Rc::new(Counter(Cell::new(0)));
        let kept_weak: Weak<dyn TreeSelectionListener> = Rc::downgrade(&kept) as Weak<_>;
        let dropped_weak: Weak<dyn TreeSelectionListener> = Rc::downgrade(&dropped) as Weak<_>;
        listeners.add(kept_weak);
        listeners.add(dropped_weak);
        drop(dropped);

        listeners.fire(|l| l.selection_changed());
        assert_eq!(kept.0.get(), 1);
        assert_eq!(listeners.entries.len(), 1);
    }

    #[test]
    fn painter_events_invalidate_calibration() {
        let invalidation = Invalidation::new();
        invalidation.mark_calibrated();
        assert!(invalidation.take_repaint());
        assert!(!invalidation.take_repaint());

        let mut listeners: Listeners<dyn PainterListener> = Listeners::new();
        let weak: Weak<dyn PainterListener> = Rc::downgrade(&invalidation) as Weak<_>;
        listeners.add(weak);
        listeners.fire(|l| l.painter_settings_changed());

        assert!(!invalidation.is_calibrated());
        assert!(invalidation.take_repaint());
    }
}
