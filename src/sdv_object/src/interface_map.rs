//! Per-class capability dispatch tables.
//!
//! A class builds its [`InterfaceMap`] once (typically in a `LazyLock`) and
//! answers every [`InterfaceAccess::get_interface`] query by walking the map
//! top to bottom. Entries either cast the object itself, forward the query to
//! a member object, or chain the whole query to another map. Entries can be
//! grouped into numbered sections guarded by a runtime predicate, which is how
//! mode-dependent capabilities (e.g. maintenance-only control surfaces) are
//! switched on and off.

use crate::interface::{InterfaceAccess, InterfaceId, InterfaceRef};

/// Section entries are placed in when no explicit section is selected. The
/// default section is always enabled.
pub const DEFAULT_SECTION: u32 = 0;

/// Casts the concrete object to one of its capability traits.
pub type Trampoline<T> = for<'a> fn(&'a T) -> InterfaceRef<'a>;

/// Resolves a member (or base) object queries are forwarded to.
pub type Delegate<T> = for<'a> fn(&'a T) -> &'a dyn InterfaceAccess;

/// Runtime guard deciding whether a section is traversed.
pub type SectionCondition<T> = fn(&T) -> bool;

enum Resolver<T> {
    /// Id match casts the object itself.
    Direct {
        id: InterfaceId,
        cast: Trampoline<T>,
    },
    /// Id match forwards the query to a member object.
    Member {
        id: InterfaceId,
        target: Delegate<T>,
    },
    /// The whole query is offered to another map; the walk continues on miss.
    Chain { target: Delegate<T> },
}

struct MapEntry<T> {
    section: u32,
    resolver: Resolver<T>,
}

/// Ordered capability dispatch table for objects of type `T`.
pub struct InterfaceMap<T> {
    entries: Vec<MapEntry<T>>,
    conditions: Vec<(u32, SectionCondition<T>)>,
}

impl<T> InterfaceMap<T> {
    pub fn builder() -> InterfaceMapBuilder<T> {
        InterfaceMapBuilder {
            entries: Vec::new(),
            conditions: Vec::new(),
            section: DEFAULT_SECTION,
        }
    }

    fn section_enabled(&self, obj: &T, section: u32) -> bool {
        if section == DEFAULT_SECTION {
            return true;
        }
        match self.conditions.iter().find(|(s, _)| *s == section) {
            Some((_, cond)) => cond(obj),
            // A section without a registered condition stays closed.
            None => false,
        }
    }

    /// Walk the map for `id`. First match wins; duplicate ids within one map
    /// are shadowed by the earlier entry.
    pub fn resolve<'a>(&self, obj: &'a T, id: InterfaceId) -> Option<InterfaceRef<'a>> {
        if id == 0 {
            return None;
        }
        for entry in &self.entries {
            if !self.section_enabled(obj, entry.section) {
                continue;
            }
            match &entry.resolver {
                Resolver::Direct { id: own, cast } if *own == id => return Some(cast(obj)),
                Resolver::Member { id: own, target } if *own == id => {
                    return target(obj).get_interface(id);
                }
                Resolver::Chain { target } => {
                    if let Some(found) = target(obj).get_interface(id) {
                        return Some(found);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Builder collecting map entries in declaration order.
pub struct InterfaceMapBuilder<T> {
    entries: Vec<MapEntry<T>>,
    conditions: Vec<(u32, SectionCondition<T>)>,
    section: u32,
}

impl<T> InterfaceMapBuilder<T> {
    /// Direct entry: `id` resolves to a cast of the object itself.
    pub fn entry(mut self, id: InterfaceId, cast: Trampoline<T>) -> Self {
        self.entries.push(MapEntry {
            section: self.section,
            resolver: Resolver::Direct { id, cast },
        });
        self
    }

    /// Member entry: `id` resolves through the member returned by `target`.
    pub fn entry_member(mut self, id: InterfaceId, target: Delegate<T>) -> Self {
        self.entries.push(MapEntry {
            section: self.section,
            resolver: Resolver::Member { id, target },
        });
        self
    }

    /// Chain entry: every id is offered to the member returned by `target`.
    pub fn chain(mut self, target: Delegate<T>) -> Self {
        self.entries.push(MapEntry {
            section: self.section,
            resolver: Resolver::Chain { target },
        });
        self
    }

    /// Register the guard condition for a numbered section.
    pub fn section_condition(mut self, section: u32, condition: SectionCondition<T>) -> Self {
        self.conditions.push((section, condition));
        self
    }

    /// Subsequent entries go into the numbered section.
    pub fn section(mut self, section: u32) -> Self {
        self.section = section;
        self
    }

    /// Subsequent entries go back into the always-enabled default section.
    pub fn default_section(mut self) -> Self {
        self.section = DEFAULT_SECTION;
        self
    }

    pub fn build(self) -> InterfaceMap<T> {
        InterfaceMap {
            entries: self.entries,
            conditions: self.conditions,
        }
    }
}
