use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use mtc_core::{ChangeId, EntityKind, Observation};

type StoreKey = (EntityKind, String);

#[derive(Debug, Clone)]
struct Pending {
    observation: Observation,
    change_id: ChangeId,
    sent: bool,
}

#[derive(Debug, Default)]
struct State {
    current: BTreeMap<StoreKey, Pending>,
    last: BTreeMap<StoreKey, Observation>,
}

/// Current and last-sent observations for every `(kind, device:key)` slot.
///
/// `current` holds the newest accepted value with a sent flag; `last` holds
/// what was most recently confirmed on the wire and is what a reconnecting
/// agent is replayed. One mutex guards both maps so a flush never sees a
/// partial key set.
#[derive(Debug)]
pub struct StateStore {
    state: Mutex<State>,
    filter_duplicates: bool,
}

fn store_key(observation: &Observation) -> StoreKey {
    (observation.kind(), observation.store_key())
}

impl StateStore {
    pub fn new(filter_duplicates: bool) -> Self {
        Self {
            state: Mutex::new(State::default()),
            filter_duplicates,
        }
    }

    // Every operation leaves both maps consistent, so a poisoned lock is safe
    // to keep using.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `observation` as the current value for its slot.
    ///
    /// Returns `false` when duplicate filtering is on and the content matches
    /// what the slot already holds.
    pub fn upsert(&self, observation: Observation) -> bool {
        let key = store_key(&observation);
        let mut state = self.lock();
        self.insert(&mut state, key, observation)
    }

    /// Builds the new value from the slot's current one (if any) under the
    /// same lock, for merges such as condition fault states.
    pub fn upsert_with<F>(&self, kind: EntityKind, key: String, merge: F) -> bool
    where
        F: FnOnce(Option<&Observation>) -> Observation,
    {
        let key = (kind, key);
        let mut state = self.lock();
        let merged = merge(state.current.get(&key).map(|p| &p.observation));
        self.insert(&mut state, key, merged)
    }

    fn insert(&self, state: &mut State, key: StoreKey, observation: Observation) -> bool {
        let change_id = observation.change_id();

        if self.filter_duplicates
            && state
                .current
                .get(&key)
                .is_some_and(|existing| existing.change_id == change_id)
        {
            return false;
        }

        state.current.insert(
            key,
            Pending {
                observation,
                change_id,
                sent: false,
            },
        );
        true
    }

    /// Returns every unsent current value and marks it sent.
    pub fn take_changed(&self) -> Vec<Observation> {
        let mut state = self.lock();
        state
            .current
            .values_mut()
            .filter(|pending| !pending.sent)
            .map(|pending| {
                pending.sent = true;
                pending.observation.clone()
            })
            .collect()
    }

    /// Clears the sent flag on values from a failed flush, unless the slot
    /// has since been overwritten with something else.
    pub fn rollback(&self, observations: &[Observation]) {
        let mut state = self.lock();
        for observation in observations {
            if let Some(pending) = state.current.get_mut(&store_key(observation))
                && pending.change_id == observation.change_id()
            {
                pending.sent = false;
            }
        }
    }

    /// Records confirmed writes, keeping the newest value per slot.
    pub fn promote_to_last(&self, observations: &[Observation]) {
        let mut state = self.lock();
        for observation in observations {
            let key = store_key(observation);
            let newer = state
                .last
                .get(&key)
                .is_none_or(|existing| observation.timestamp() >= existing.timestamp());
            if newer {
                state.last.insert(key, observation.clone());
            }
        }
    }

    /// Records values written outside a flush as both the current value of
    /// their slot, already sent, and the last one. Anything staged for the
    /// slot is superseded.
    pub fn record_sent(&self, observations: &[Observation]) {
        {
            let mut state = self.lock();
            for observation in observations {
                state.current.insert(
                    store_key(observation),
                    Pending {
                        observation: observation.clone(),
                        change_id: observation.change_id(),
                        sent: true,
                    },
                );
            }
        }
        self.promote_to_last(observations);
    }

    pub fn replay_last(&self) -> Vec<Observation> {
        self.lock().last.values().cloned().collect()
    }

    /// Every slot the store knows of: current values, plus last-sent values
    /// for slots that only went through the immediate path.
    pub fn known(&self) -> Vec<Observation> {
        let state = self.lock();
        let mut known: BTreeMap<&StoreKey, &Observation> = state
            .last
            .iter()
            .collect();
        for (key, pending) in &state.current {
            known.insert(key, &pending.observation);
        }
        known.into_values().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().current.values().filter(|p| !p.sent).count()
    }
}
