//! Insertion, removal and renaming of dylib load commands.

use super::container::MachOContainer;
use super::load_command::{DylibCommand, LoadCommand};
use crate::{Error, Result};
use log::{info, warn};
use std::collections::BTreeSet;

/// Which load command an injected dependency uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DylibKind {
    /// `LC_LOAD_DYLIB`: the loader fails if the library is missing.
    #[default]
    Strong,
    /// `LC_LOAD_WEAK_DYLIB`: a missing library is tolerated.
    Weak,
}

/// Edits the dylib dependencies of a slice.
///
/// Every edit leaves any existing code signature stale; re-sign afterwards.
pub struct DylibEditor<'a> {
    container: &'a mut MachOContainer,
}

impl<'a> DylibEditor<'a> {
    pub fn new(container: &'a mut MachOContainer) -> Self {
        Self { container }
    }

    /// Appends a dylib command for `path` to the end of the load-command table.
    ///
    /// Paths already present are not deduplicated; a second command is added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capacity`] when the padding between the load commands
    /// and the first section cannot hold the new command. The slice then has
    /// to be rebuilt with more header padding; nothing was modified.
    pub fn inject_dylib(&mut self, path: &str, kind: DylibKind) -> Result<()> {
        if path.is_empty() {
            return Err(Error::Config("dylib path is empty".into()));
        }
        if self.container.find_dylib(path).is_some() {
            warn!("{path} is already linked, adding another load command");
        }

        let command = DylibCommand::new(path);
        let size = command.cmdsize();
        let mut commands = self.container.commands().to_vec();
        commands.push(match kind {
            DylibKind::Strong => LoadCommand::LoadDylib(command),
            DylibKind::Weak => LoadCommand::LoadWeakDylib(command),
        });
        self.container.replace_commands(commands)?;

        info!("injected {kind:?} dylib {path} ({size} bytes)");
        Ok(())
    }

    /// Removes every dylib command whose path is in `names`. See
    /// [`MachOContainer::uninstall_dylibs`].
    pub fn remove_dylibs(&mut self, names: &BTreeSet<String>) -> Result<usize> {
        self.container.uninstall_dylibs(names)
    }

    /// Renames a dependency, widening its command when the new path does not
    /// fit. Widening re-lays out the table, so every later command moves.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no dylib command carries `old`
    /// - [`Error::Capacity`] if the widened table no longer fits before the
    ///   first section
    pub fn rename_dylib(&mut self, old: &str, new: &str) -> Result<()> {
        let index = self
            .container
            .find_dylib(old)
            .ok_or_else(|| Error::NotFound(old.to_string()))?;

        let mut commands = self.container.commands().to_vec();
        let widened = match commands[index].as_dylib() {
            Some(dylib) if dylib.fits(new) => return self.container.change_dylib_path(old, new),
            Some(dylib) => dylib.with_path(new),
            None => return Err(Error::NotFound(old.to_string())),
        };

        commands[index] = match commands[index] {
            LoadCommand::LoadWeakDylib(_) => LoadCommand::LoadWeakDylib(widened),
            _ => LoadCommand::LoadDylib(widened),
        };
        self.container.replace_commands(commands)?;

        info!("renamed dylib {old} -> {new} (command widened)");
        Ok(())
    }
}
