//! nft script generation
//!
//! Turns a [`Table`]'s pending changes into a script for `nft -f -`. The
//! update script is built in seven phases, each a method on
//! [`ScriptBuilder`], and the phase order is what keeps nft from failing on
//! objects that do not exist yet:
//!
//! 1. declare the table, new maps and sets, and empty versions of dirty chains
//! 2. flush the table if it is newly declared
//! 3. flush new maps, then new sets, then dirty chains
//! 4. delete buffered map elements, then set elements
//! 5. delete removed chains
//! 6. re-declare dirty chains with their full rule lists
//! 7. add buffered map elements, then set elements
//!
//! Phase 1 exists because flushing something that was never declared is an
//! error, while declaring something that already exists is not. Flushing then
//! clears anything a previous process left behind under the same name.

use crate::core::table::{Chain, Set, Table, VerdictMap};
use std::fmt::Write;

/// Script applying everything that changed since the last successful apply.
pub fn update_script(table: &Table) -> String {
    let mut builder = ScriptBuilder::new(table);
    builder.declare_objects();
    builder.flush_table();
    builder.flush_objects();
    builder.delete_elements();
    builder.delete_chains();
    builder.populate_chains();
    builder.add_elements();
    builder.finish()
}

/// Script deleting the table and recreating it from the in-memory model.
///
/// The bare table is declared first so the delete cannot fail when the table
/// has already vanished from the kernel.
pub fn reload_script(table: &Table) -> String {
    let mut builder = ScriptBuilder::new(table);
    builder.recreate_table();
    builder.finish()
}

/// Prefixes every line with its 1-based number, as referenced by nft errors.
pub fn number_lines(script: &str) -> String {
    let mut out = String::with_capacity(script.len() + script.len() / 8);
    for (i, line) in script.lines().enumerate() {
        let _ = writeln!(out, "{}:\t{line}", i + 1);
    }
    out
}

/// Writes one script for one table.
pub struct ScriptBuilder<'a> {
    table: &'a Table,
    family: String,
    out: String,
}

impl<'a> ScriptBuilder<'a> {
    pub fn new(table: &'a Table) -> Self {
        Self {
            table,
            family: table.family().to_string(),
            out: String::new(),
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn dirty_chains(&self) -> impl Iterator<Item = &'a Chain> + use<'a> {
        self.table.chains.values().filter(|c| c.dirty)
    }

    fn new_vmaps(&self) -> impl Iterator<Item = &'a VerdictMap> + use<'a> {
        self.table.vmaps.values().filter(|m| m.newly_declared)
    }

    fn new_sets(&self) -> impl Iterator<Item = &'a Set> + use<'a> {
        self.table.sets.values().filter(|s| s.newly_declared)
    }

    /// Phase 1
    pub fn declare_objects(&mut self) {
        let _ = writeln!(
            self.out,
            "table {} {} {{",
            self.family,
            self.table.name()
        );
        for vmap in self.new_vmaps() {
            self.write_vmap(vmap, false);
        }
        for set in self.new_sets() {
            self.write_set(set, false);
        }
        for chain in self.dirty_chains() {
            self.write_chain(chain, false);
        }
        let _ = writeln!(self.out, "}}");
    }

    /// Phase 2
    pub fn flush_table(&mut self) {
        if self.table.newly_declared {
            let _ = writeln!(
                self.out,
                "flush table {} {}",
                self.family,
                self.table.name()
            );
        }
    }

    /// Phase 3
    pub fn flush_objects(&mut self) {
        let (family, table) = (&self.family, self.table.name());
        for vmap in self.new_vmaps() {
            let _ = writeln!(self.out, "flush map {family} {table} {}", vmap.name);
        }
        for set in self.new_sets() {
            let _ = writeln!(self.out, "flush set {family} {table} {}", set.name);
        }
        for chain in self.dirty_chains() {
            let _ = writeln!(self.out, "flush chain {family} {table} {}", chain.name);
        }
    }

    /// Phase 4
    pub fn delete_elements(&mut self) {
        let (family, table) = (&self.family, self.table.name());
        for vmap in self.table.vmaps.values() {
            if !vmap.deleted.is_empty() {
                let keys = join(vmap.deleted.iter().map(String::as_str));
                let _ = writeln!(
                    self.out,
                    "delete element {family} {table} {} {{ {keys} }}",
                    vmap.name
                );
            }
        }
        for set in self.table.sets.values() {
            if !set.deleted.is_empty() {
                let elements = join(set.deleted.iter().map(String::as_str));
                let _ = writeln!(
                    self.out,
                    "delete element {family} {table} {} {{ {elements} }}",
                    set.name
                );
            }
        }
    }

    /// Phase 5
    pub fn delete_chains(&mut self) {
        for command in &self.table.delete_chain_commands {
            let _ = writeln!(self.out, "{command}");
        }
    }

    /// Phase 6
    pub fn populate_chains(&mut self) {
        if self.dirty_chains().next().is_none() {
            return;
        }
        let _ = writeln!(
            self.out,
            "table {} {} {{",
            self.family,
            self.table.name()
        );
        for chain in self.dirty_chains() {
            self.write_chain(chain, true);
        }
        let _ = writeln!(self.out, "}}");
    }

    /// Phase 7
    pub fn add_elements(&mut self) {
        let (family, table) = (&self.family, self.table.name());
        for vmap in self.table.vmaps.values() {
            if !vmap.added.is_empty() {
                let pairs = join(vmap.added.iter().map(|(k, v)| format!("{k} : {v}")));
                let _ = writeln!(
                    self.out,
                    "add element {family} {table} {} {{ {pairs} }}",
                    vmap.name
                );
            }
        }
        for set in self.table.sets.values() {
            if !set.added.is_empty() {
                let elements = join(set.added.iter().map(String::as_str));
                let _ = writeln!(
                    self.out,
                    "add element {family} {table} {} {{ {elements} }}",
                    set.name
                );
            }
        }
    }

    /// The whole reload script.
    pub fn recreate_table(&mut self) {
        let (family, table) = (&self.family, self.table.name());
        let _ = writeln!(self.out, "table {family} {table} {{}}");
        let _ = writeln!(self.out, "delete table {family} {table}");
        let _ = writeln!(self.out, "table {family} {table} {{");
        for vmap in self.table.vmaps.values() {
            self.write_vmap(vmap, true);
        }
        for set in self.table.sets.values() {
            self.write_set(set, true);
        }
        for chain in self.table.chains.values() {
            self.write_chain(chain, true);
        }
        let _ = writeln!(self.out, "}}");
    }

    fn write_vmap(&mut self, vmap: &VerdictMap, with_elements: bool) {
        let _ = writeln!(self.out, "\tmap {} {{", vmap.name);
        let _ = writeln!(self.out, "\t\ttype {} : verdict", vmap.element_type);
        if !vmap.flags.is_empty() {
            let _ = writeln!(self.out, "\t\tflags {}", vmap.flags.join(","));
        }
        if with_elements && !vmap.elements.is_empty() {
            let pairs = join(vmap.elements.iter().map(|(k, v)| format!("{k} : {v}")));
            let _ = writeln!(self.out, "\t\telements = {{ {pairs} }}");
        }
        let _ = writeln!(self.out, "\t}}");
    }

    fn write_set(&mut self, set: &Set, with_elements: bool) {
        let _ = writeln!(self.out, "\tset {} {{", set.name);
        let _ = writeln!(self.out, "\t\ttype {}", set.element_type);
        if !set.flags.is_empty() {
            let _ = writeln!(self.out, "\t\tflags {}", set.flags.join(","));
        }
        if with_elements && !set.elements.is_empty() {
            let elements = join(set.elements.iter().map(String::as_str));
            let _ = writeln!(self.out, "\t\telements = {{ {elements} }}");
        }
        let _ = writeln!(self.out, "\t}}");
    }

    fn write_chain(&mut self, chain: &Chain, with_rules: bool) {
        let _ = writeln!(self.out, "\tchain {} {{", chain.name);
        if let Some(base) = &chain.base {
            let _ = writeln!(
                self.out,
                "\t\ttype {} hook {} priority {}; policy {};",
                base.chain_type, base.hook, base.priority, base.policy
            );
        }
        if with_rules {
            for rule in chain.rules() {
                let _ = writeln!(self.out, "\t\t{rule}");
            }
        }
        let _ = writeln!(self.out, "\t}}");
    }
}

fn join<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(item.as_ref());
    }
    out
}
