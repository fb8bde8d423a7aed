//! Signature space reservation at the tail of `__LINKEDIT`.

mod common;

use archo::{Error, MachOContainer, SignatureSpaceAllocator};
use common::{Fixture, LINKEDIT_PATTERN, TRAILING_PATTERN};

#[test]
fn test_adds_code_signature_command() {
    for (is_64, big_endian) in [(true, false), (false, true)] {
        let fixture = Fixture {
            is_64,
            big_endian,
            ..Fixture::default()
        };
        let layout = fixture.layout();
        let mut container = MachOContainer::parse(fixture.build()).unwrap();

        let reserved = SignatureSpaceAllocator::new().realloc(&mut container).unwrap();

        let sig = container.code_signature().unwrap();
        assert_eq!(sig.dataoff as usize, layout.linkedit_end);
        assert_eq!(sig.datasize, reserved);
        assert_eq!(
            u64::from(reserved),
            SignatureSpaceAllocator::estimate_signature_size(u64::from(sig.dataoff))
        );
        assert_eq!(container.len(), layout.linkedit_end + reserved as usize);
        assert_eq!(container.header().ncmds, 7);

        let linkedit = container.linkedit().unwrap();
        assert_eq!(linkedit.file_end(), container.len() as u64);
        assert_eq!(linkedit.vmsize % 0x4000, 0);
        assert!(linkedit.vmsize >= linkedit.filesize);

        assert!(container.signature_region().unwrap().iter().all(|&b| b == 0));
        let symbols = &container.as_bytes()[layout.linkedit_offset..][..fixture.linkedit_size];
        assert!(symbols.iter().all(|&b| b == LINKEDIT_PATTERN));

        let reparsed = MachOContainer::parse(container.into_bytes()).unwrap();
        assert_eq!(reparsed.code_signature(), Some(sig));
    }
}

#[test]
fn test_reuses_large_enough_region() {
    let fixture = Fixture {
        signature: Some(0x8000),
        ..Fixture::default()
    };
    let original = fixture.build();
    let mut container = MachOContainer::parse(original.clone()).unwrap();

    let reserved = SignatureSpaceAllocator::new().realloc(&mut container).unwrap();

    assert_eq!(reserved, 0x8000);
    assert_eq!(container.as_bytes(), &original[..]);
}

#[test]
fn test_grows_small_region() {
    let fixture = Fixture {
        signature: Some(0x100),
        ..Fixture::default()
    };
    let layout = fixture.layout();
    let mut container = MachOContainer::parse(fixture.build()).unwrap();

    let reserved = SignatureSpaceAllocator::new().realloc(&mut container).unwrap();

    let sig = container.code_signature().unwrap();
    assert_eq!(sig.dataoff as usize, layout.signature_offset.unwrap());
    assert!(reserved > 0x100);
    assert_eq!(container.len(), sig.dataoff as usize + reserved as usize);
    assert_eq!(container.header().ncmds, 7);
}

#[test]
fn test_reuse_ignores_data_after_signature() {
    let fixture = Fixture {
        signature: Some(0x8000),
        after_signature: 0x40,
        ..Fixture::default()
    };
    let original = fixture.build();
    let mut container = MachOContainer::parse(original.clone()).unwrap();

    let reserved = SignatureSpaceAllocator::new().realloc(&mut container).unwrap();

    assert_eq!(reserved, 0x8000);
    assert_eq!(container.as_bytes(), &original[..]);
}

#[test]
fn test_grows_region_followed_by_linkedit_data() {
    let fixture = Fixture {
        signature: Some(0x100),
        after_signature: 0x40,
        ..Fixture::default()
    };
    let layout = fixture.layout();
    let mut container = MachOContainer::parse(fixture.build()).unwrap();

    let reserved = SignatureSpaceAllocator::new().realloc(&mut container).unwrap();

    let sig = container.code_signature().unwrap();
    let sig_off = layout.signature_offset.unwrap();
    assert_eq!(sig.dataoff as usize, sig_off);
    assert!(reserved > 0x100);

    let moved_to = sig_off + reserved as usize;
    let moved = &container.as_bytes()[moved_to..moved_to + 0x40];
    assert!(moved.iter().all(|&b| b == LINKEDIT_PATTERN));
    assert!(container.signature_region().unwrap().iter().all(|&b| b == 0));

    let linkedit = container.linkedit().unwrap();
    assert_eq!(linkedit.file_end() as usize, moved_to + 0x40);
    assert_eq!(container.len(), moved_to + 0x40);
}

#[test]
fn test_shifts_content_behind_linkedit() {
    let fixture = Fixture {
        trailing_segment: true,
        ..Fixture::default()
    };
    let layout = fixture.layout();
    let mut container = MachOContainer::parse(fixture.build()).unwrap();

    let reserved = SignatureSpaceAllocator::new().realloc(&mut container).unwrap();

    let trailing = container.segment("__EXTRA").unwrap().clone();
    let delta = reserved as u64;
    assert_eq!(trailing.fileoff, layout.trailing_offset.unwrap() as u64 + delta);
    assert_eq!(trailing.filesize, 0x100);
    let moved = &container.as_bytes()[trailing.fileoff as usize..trailing.file_end() as usize];
    assert!(moved.iter().all(|&b| b == TRAILING_PATTERN));
    assert_eq!(container.len(), layout.file_len + reserved as usize);
}

#[test]
fn test_reserve_at_least() {
    let mut container = MachOContainer::parse(Fixture::default().build()).unwrap();
    let reserved = SignatureSpaceAllocator::new()
        .reserve_at_least(100_000)
        .realloc(&mut container)
        .unwrap();
    assert_eq!(reserved, 100_000);
}

#[test]
fn test_payload_hint_adds_room() {
    let plain = SignatureSpaceAllocator::new()
        .realloc(&mut MachOContainer::parse(Fixture::default().build()).unwrap())
        .unwrap();
    let hinted = SignatureSpaceAllocator::new()
        .payload_hint(1000)
        .realloc(&mut MachOContainer::parse(Fixture::default().build()).unwrap())
        .unwrap();
    assert_eq!(hinted, plain + 1008);
}

#[test]
fn test_realloc_twice_is_stable() {
    let mut container = MachOContainer::parse(Fixture::default().build()).unwrap();
    let allocator = SignatureSpaceAllocator::new();
    let first = allocator.realloc(&mut container).unwrap();
    let snapshot = container.as_bytes().to_vec();

    let second = allocator.realloc(&mut container).unwrap();

    assert_eq!(first, second);
    assert_eq!(container.as_bytes(), &snapshot[..]);
}

#[test]
fn test_no_room_for_code_signature_command() {
    let fixture = Fixture {
        padding: 8,
        ..Fixture::default()
    };
    let original = fixture.build();
    let mut container = MachOContainer::parse(original.clone()).unwrap();

    let err = SignatureSpaceAllocator::new().realloc(&mut container).unwrap_err();

    assert!(matches!(err, Error::Capacity(_)));
    assert_eq!(container.as_bytes(), &original[..]);
}

#[test]
fn test_requires_linkedit() {
    let mut bytes = Fixture::default().build();
    let at = bytes
        .windows(10)
        .position(|w| w == b"__LINKEDIT")
        .unwrap();
    bytes[at..at + 10].copy_from_slice(b"__OTHERSEG");
    let mut container = MachOContainer::parse(bytes).unwrap();

    let err = SignatureSpaceAllocator::new().realloc(&mut container).unwrap_err();
    assert!(matches!(err, Error::Format(_)));
}

#[test]
fn test_realloc_to_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("App");
    let mut container = MachOContainer::parse(Fixture::default().build()).unwrap();

    let reserved = SignatureSpaceAllocator::new()
        .realloc_to(&mut container, &target)
        .unwrap();

    let reopened = MachOContainer::open(&target).unwrap();
    assert_eq!(reopened.code_signature().unwrap().datasize, reserved);
}
