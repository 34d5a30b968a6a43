//! Overload grouping and handle slot naming
//!
//! Mappings are grouped by template method name and ordered by their
//! synthetic descriptor, never by reflection order. Indirect mappings get a
//! handle slot with a stable synthetic name:
//!
//! - constructors: `init`, or `init0`, `init1`, ... when there are several
//! - field accessors: `<field>_getter` / `<field>_setter`
//! - methods: the member name, indexed the same way when overloaded
//!
//! Two mappings resolving to the same member share one slot.

use std::collections::BTreeMap;

use proxygen_bytecode::MemberRef;
use rustc_hash::{FxHashMap, FxHashSet};

use super::{MappingKind, MappingTable, MemberMapping};

/// A static slot holding one resolved handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleSlot {
    pub name: String,
    pub member: MemberRef,
}

/// Overload groups and handle slots of one mapping table
#[derive(Debug, Clone, Default)]
pub struct OverloadTable {
    /// Template method name to mapping positions, sorted by synthetic descriptor
    groups: BTreeMap<String, Vec<usize>>,
    /// Slot index per mapping position (positions follow [`MappingTable::all`])
    slot_of: Vec<Option<usize>>,
    slots: Vec<HandleSlot>,
}

impl OverloadTable {
    pub fn build(table: &MappingTable) -> Self {
        let all: Vec<&MemberMapping> = table.all().collect();

        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (pos, mapping) in all.iter().enumerate() {
            if mapping.method_index.is_some() {
                groups.entry(mapping.name.clone()).or_default().push(pos);
            }
        }
        for positions in groups.values_mut() {
            positions.sort_by_key(|&p| all[p].synthetic_desc.to_string());
        }

        // Base names of indirect mappings, grouped so overloads can be indexed.
        let mut by_base: BTreeMap<(String, MappingKind), Vec<usize>> = BTreeMap::new();
        for (pos, mapping) in all.iter().enumerate() {
            if mapping.indirect {
                by_base
                    .entry((base_name(mapping), mapping.kind))
                    .or_default()
                    .push(pos);
            }
        }

        let mut slot_of = vec![None; all.len()];
        let mut slots: Vec<HandleSlot> = Vec::new();
        let mut by_member: FxHashMap<MemberRef, usize> = FxHashMap::default();
        let mut taken: FxHashSet<String> = FxHashSet::default();

        for ((base, _), mut positions) in by_base {
            positions.sort_by_key(|&p| sort_key(all[p]));
            // Distinct members decide whether this base needs indexing.
            let mut members: Vec<MemberRef> = Vec::new();
            for &p in &positions {
                let member = all[p].member.member_ref();
                if !members.contains(&member) {
                    members.push(member);
                }
            }
            let indexed = members.len() > 1;

            for p in positions {
                let member = all[p].member.member_ref();
                if let Some(&slot) = by_member.get(&member) {
                    slot_of[p] = Some(slot);
                    continue;
                }
                let ordinal = members.iter().position(|m| *m == member).unwrap_or(0);
                let mut name = if indexed {
                    format!("{}{}", base, ordinal)
                } else {
                    base.clone()
                };
                if taken.contains(&name) {
                    let mut n = 1;
                    while taken.contains(&format!("{}${}", name, n)) {
                        n += 1;
                    }
                    name = format!("{}${}", name, n);
                }
                taken.insert(name.clone());
                let slot = slots.len();
                slots.push(HandleSlot {
                    name,
                    member: member.clone(),
                });
                by_member.insert(member, slot);
                slot_of[p] = Some(slot);
            }
        }

        Self {
            groups,
            slot_of,
            slots,
        }
    }

    /// Template method name to mapping positions, in dispatch order
    pub fn groups(&self) -> &BTreeMap<String, Vec<usize>> {
        &self.groups
    }

    /// Handle slot of the mapping at `position`
    pub fn slot_of(&self, position: usize) -> Option<usize> {
        self.slot_of.get(position).copied().flatten()
    }

    pub fn slots(&self) -> &[HandleSlot] {
        &self.slots
    }

    pub fn slot_name(&self, position: usize) -> Option<&str> {
        self.slot_of(position).map(|s| self.slots[s].name.as_str())
    }
}

fn base_name(mapping: &MemberMapping) -> String {
    match mapping.kind {
        MappingKind::Constructor => "init".to_string(),
        MappingKind::FieldGetter => format!("{}_getter", mapping.member_name()),
        MappingKind::FieldSetter => format!("{}_setter", mapping.member_name()),
        MappingKind::Method => mapping.member_name(),
    }
}

fn sort_key(mapping: &MemberMapping) -> (String, String) {
    (
        mapping.synthetic_desc.to_string(),
        mapping.member.member_ref().desc.to_string(),
    )
}
