/// A slot in the slab.
enum Entry<T> {
    Occupied { gen: u32, value: T },
    Vacant { gen: u32 },
}

/// A generational slab: indices are reused, but every reuse bumps the slot's
/// generation so that stale `(idx, gen)` pairs are rejected.
pub(crate) struct Slab<T> {
    /// Slots.
    entries: Vec<Entry<T>>,

    /// Vacant slot indices, reused LIFO.
    free: Vec<u32>,

    /// Number of occupied slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Create an empty slab.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Return the number of occupied slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Insert a value and return its `(idx, gen)` key.
    pub fn insert(&mut self, value: T) -> (u32, u32) {
        self.len += 1;
        match self.free.pop() {
            Some(idx) => {
                let slot = &mut self.entries[idx as usize];
                let gen = match *slot {
                    Entry::Vacant { gen } => gen,
                    Entry::Occupied { .. } => unreachable!("occupied slot on the free list"),
                };
                *slot = Entry::Occupied { gen, value };
                (idx, gen)
            }
            None => {
                let idx = self.entries.len() as u32;
                self.entries.push(Entry::Occupied { gen: 0, value });
                (idx, 0)
            }
        }
    }

    /// Return the value under the given key, if it is still live.
    pub fn get(&self, idx: u32, gen: u32) -> Option<&T> {
        match self.entries.get(idx as usize)? {
            Entry::Occupied { gen: g, value } if *g == gen => Some(value),
            _ => None,
        }
    }

    /// Remove the value under the given key, if it is still live.
    pub fn remove(&mut self, idx: u32, gen: u32) -> Option<T> {
        let slot = self.entries.get_mut(idx as usize)?;
        match slot {
            Entry::Occupied { gen: g, .. } if *g == gen => {}
            _ => return None,
        }

        let old = std::mem::replace(
            slot,
            Entry::Vacant {
                gen: gen.wrapping_add(1),
            },
        );
        self.free.push(idx);
        self.len -= 1;
        match old {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    /// Iterate over live keys in index order.
    pub fn keys(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, e)| match e {
                Entry::Occupied { gen, .. } => Some((idx as u32, *gen)),
                Entry::Vacant { .. } => None,
            })
    }

    /// Remove every live value, in index order.
    pub fn drain(&mut self) -> Vec<T> {
        let keys: Vec<_> = self.keys().collect();
        keys.into_iter()
            .filter_map(|(idx, gen)| self.remove(idx, gen))
            .collect()
    }
}
