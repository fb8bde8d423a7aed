//! Injecting, removing and renaming dylib dependencies.

mod common;

use archo::macho::LoadCommand;
use archo::{DylibEditor, DylibKind, Error, MachOContainer};
use common::Fixture;
use std::collections::BTreeSet;

const HOOK: &str = "@executable_path/Frameworks/libHook.dylib";

#[test]
fn test_inject_appends_command() {
    for (is_64, big_endian) in [(true, false), (true, true), (false, false), (false, true)] {
        let fixture = Fixture {
            is_64,
            big_endian,
            ..Fixture::default()
        };
        let mut container = MachOContainer::parse(fixture.build()).unwrap();
        let ncmds = container.header().ncmds;
        let sizeofcmds = container.header().sizeofcmds;

        DylibEditor::new(&mut container).inject_dylib(HOOK, DylibKind::Strong).unwrap();

        // 41 bytes of path padded to 48, after the 24-byte struct
        assert_eq!(container.header().ncmds, ncmds + 1);
        assert_eq!(container.header().sizeofcmds, sizeofcmds + 72);
        assert_eq!(container.list_dylibs().last().unwrap(), HOOK);
        assert!(matches!(container.commands().last(), Some(LoadCommand::LoadDylib(_))));

        let reparsed = MachOContainer::parse(container.into_bytes()).unwrap();
        assert_eq!(reparsed.list_dylibs().len(), 4);
        assert_eq!(reparsed.list_dylibs()[3], HOOK);
    }
}

#[test]
fn test_inject_weak() {
    let mut container = MachOContainer::parse(Fixture::default().build()).unwrap();
    DylibEditor::new(&mut container).inject_dylib(HOOK, DylibKind::Weak).unwrap();
    assert!(matches!(container.commands().last(), Some(LoadCommand::LoadWeakDylib(_))));
}

#[test]
fn test_inject_same_path_twice_adds_two_commands() {
    let mut container = MachOContainer::parse(Fixture::default().build()).unwrap();
    let mut editor = DylibEditor::new(&mut container);
    editor.inject_dylib(HOOK, DylibKind::Strong).unwrap();
    editor.inject_dylib(HOOK, DylibKind::Strong).unwrap();
    assert_eq!(container.dylibs().filter(|p| p == HOOK).count(), 2);
}

#[test]
fn test_inject_without_padding_fails_cleanly() {
    let fixture = Fixture {
        padding: 16,
        ..Fixture::default()
    };
    let original = fixture.build();
    let mut container = MachOContainer::parse(original.clone()).unwrap();

    let err = DylibEditor::new(&mut container)
        .inject_dylib(HOOK, DylibKind::Strong)
        .unwrap_err();

    assert!(matches!(err, Error::Capacity(_)));
    assert_eq!(container.as_bytes(), &original[..]);
    assert_eq!(container.list_dylibs().len(), 3);
}

#[test]
fn test_inject_uses_exact_padding() {
    let fixture = Fixture {
        padding: 72,
        ..Fixture::default()
    };
    let mut container = MachOContainer::parse(fixture.build()).unwrap();
    DylibEditor::new(&mut container).inject_dylib(HOOK, DylibKind::Strong).unwrap();
    assert_eq!(container.load_commands_free_space(), 0);
}

#[test]
fn test_inject_rejects_empty_path() {
    let mut container = MachOContainer::parse(Fixture::default().build()).unwrap();
    let err = DylibEditor::new(&mut container).inject_dylib("", DylibKind::Strong).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_remove_then_inject_reuses_space() {
    let mut container = MachOContainer::parse(Fixture::default().build()).unwrap();
    let free = container.load_commands_free_space();
    let mut editor = DylibEditor::new(&mut container);

    let names: BTreeSet<String> = ["@rpath/libOptional.dylib".to_string()].into();
    assert_eq!(editor.remove_dylibs(&names).unwrap(), 1);
    editor.inject_dylib("@rpath/libOptional.dylib", DylibKind::Weak).unwrap();

    assert_eq!(container.load_commands_free_space(), free);
    assert_eq!(container.list_dylibs()[2], "@rpath/libOptional.dylib");
}

#[test]
fn test_rename_in_place_when_it_fits() {
    let mut container = MachOContainer::parse(Fixture::default().build()).unwrap();
    let sizeofcmds = container.header().sizeofcmds;

    DylibEditor::new(&mut container)
        .rename_dylib("@rpath/libOptional.dylib", "@rpath/libOther.dylib")
        .unwrap();

    assert_eq!(container.header().sizeofcmds, sizeofcmds);
    assert_eq!(container.list_dylibs()[2], "@rpath/libOther.dylib");
}

#[test]
fn test_rename_widens_command() {
    let mut container = MachOContainer::parse(Fixture::default().build()).unwrap();
    let sizeofcmds = container.header().sizeofcmds;
    let longer = "@executable_path/Frameworks/Optional.framework/Optional";

    DylibEditor::new(&mut container)
        .rename_dylib("@rpath/libOptional.dylib", longer)
        .unwrap();

    // 32 bytes of name area grow to 56
    assert_eq!(container.header().sizeofcmds, sizeofcmds + 24);
    assert!(matches!(container.commands()[3], LoadCommand::LoadWeakDylib(_)));

    let reparsed = MachOContainer::parse(container.into_bytes()).unwrap();
    assert_eq!(reparsed.list_dylibs()[2], longer);
    assert_eq!(reparsed.commands().len(), 6);
}

#[test]
fn test_rename_missing_dylib() {
    let mut container = MachOContainer::parse(Fixture::default().build()).unwrap();
    let err = DylibEditor::new(&mut container)
        .rename_dylib("/usr/lib/libNope.dylib", "/usr/lib/libYes.dylib")
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_rename_widening_without_padding() {
    let fixture = Fixture {
        padding: 8,
        ..Fixture::default()
    };
    let original = fixture.build();
    let mut container = MachOContainer::parse(original.clone()).unwrap();

    let err = DylibEditor::new(&mut container)
        .rename_dylib("@rpath/libOptional.dylib", "@rpath/a/much/much/longer/path/to/libOptional.dylib")
        .unwrap_err();

    assert!(matches!(err, Error::Capacity(_)));
    assert_eq!(container.as_bytes(), &original[..]);
}
