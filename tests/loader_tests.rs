//! WorldLoader tests: load pipeline, compatibility gate, save/unload, startup

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;
    use worldstore::chunk::{Chunk, Section};
    use worldstore::format;
    use worldstore::tag::Tag;
    use worldstore::{
        BackendRegistry, ChunkPos, Difficulty, Encoding, ErrorKind, FileBackend, SpawnPoint,
        World, WorldEntry, WorldError, WorldLoader, WorldProperties,
    };

    fn legacy_world(name: &str) -> World {
        let mut world = World::empty(name, "file", Encoding::Legacy, WorldProperties::default());
        let mut chunk = Chunk::new(ChunkPos::new(0, 0), Encoding::Legacy);
        chunk.set_section(0, Section::legacy_filled(1)).unwrap();
        world.insert_chunk(chunk).unwrap();
        world
    }

    fn modern_world(name: &str) -> World {
        World::empty(name, "file", Encoding::Modern, WorldProperties::default())
    }

    fn store(dir: &TempDir, world: &World) {
        fs::write(
            dir.path().join(format!("{}.world", world.name())),
            format::encode(world).unwrap(),
        )
        .unwrap();
    }

    fn loader(dir: &TempDir, host_uses_modern: bool) -> WorldLoader {
        let registry = Arc::new(BackendRegistry::new());
        registry
            .register("file", Arc::new(FileBackend::new(dir.path()).unwrap()))
            .unwrap();
        WorldLoader::new(registry, host_uses_modern)
    }

    fn lock_exists(dir: &TempDir, world: &str) -> bool {
        dir.path().join(format!("{}.world.lock", world)).exists()
    }

    // -----------------------------------------------------------------------
    // Load pipeline
    // -----------------------------------------------------------------------

    #[test]
    fn load_applies_properties_and_holds_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, &legacy_world("spawn"));
        let loader = loader(&dir, false);

        let props = WorldProperties {
            spawn: SpawnPoint::new(10.0, 64.0, -5.5),
            difficulty: Difficulty::Hard,
            allow_monsters: false,
            allow_animals: true,
            read_only: false,
        };
        let world = loader.load_world("file", "spawn", props).unwrap();
        assert_eq!(world.name(), "spawn");
        assert_eq!(world.backend(), "file");
        assert_eq!(world.properties(), &props);
        assert_eq!(world.chunk_count(), 1);
        assert!(lock_exists(&dir, "spawn"));
        assert!(loader.locks().token_for("spawn").is_some());

        loader.unload_world("spawn").unwrap();
        assert!(!lock_exists(&dir, "spawn"));
        assert!(!loader.locks().is_active("spawn"));
    }

    #[test]
    fn unknown_backend_and_world() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(&dir, false);

        assert_eq!(
            loader
                .load_world("mysql", "spawn", WorldProperties::default())
                .unwrap_err(),
            WorldError::UnknownBackend {
                backend: "mysql".into()
            }
        );
        assert_eq!(
            loader
                .load_world("file", "spawn", WorldProperties::default())
                .unwrap_err(),
            WorldError::UnknownWorld {
                world: "spawn".into(),
                backend: "file".into()
            }
        );
        assert!(!loader.locks().is_active("spawn"));
    }

    // -----------------------------------------------------------------------
    // Compatibility gate
    // -----------------------------------------------------------------------

    #[test]
    fn modern_world_on_legacy_host_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, &modern_world("new"));
        let loader = loader(&dir, false);

        let err = loader
            .load_world("file", "new", WorldProperties::default())
            .unwrap_err();
        assert_eq!(
            err,
            WorldError::UnsupportedWorld {
                world: "new".into(),
                modern: true
            }
        );
        assert!(err.to_string().contains("1.13 or newer"), "{err}");
        assert!(!lock_exists(&dir, "new"));
        assert!(!loader.locks().is_active("new"));
    }

    #[test]
    fn legacy_world_on_modern_host_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, &legacy_world("old"));
        let loader = loader(&dir, true);

        let err = loader
            .load_world("file", "old", WorldProperties::read_only())
            .unwrap_err();
        assert_eq!(
            err,
            WorldError::UnsupportedWorld {
                world: "old".into(),
                modern: false
            }
        );
        assert!(err.to_string().contains("1.12.2 or older"), "{err}");
        assert_eq!(err.kind(), ErrorKind::UnsupportedWorld);
        assert!(!err.kind().is_retryable());
    }

    #[test]
    fn corrupted_world_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = format::encode(&legacy_world("bad")).unwrap().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;
        fs::write(dir.path().join("bad.world"), bytes).unwrap();
        let loader = loader(&dir, false);

        assert!(matches!(
            loader.load_world("file", "bad", WorldProperties::default()),
            Err(WorldError::CorruptedWorld { ref world, .. }) if world == "bad"
        ));
        assert!(!lock_exists(&dir, "bad"));
    }

    // -----------------------------------------------------------------------
    // Save / unload
    // -----------------------------------------------------------------------

    #[test]
    fn save_writes_through_the_held_lock() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, &legacy_world("spawn"));
        let loader = loader(&dir, false);

        let mut world = loader
            .load_world("file", "spawn", WorldProperties::default())
            .unwrap();
        world.extra_mut().insert("time", Tag::Long(6000));
        let mut chunk = Chunk::new(ChunkPos::new(1, -1), Encoding::Legacy);
        chunk.set_section(3, Section::legacy_filled(4)).unwrap();
        world.insert_chunk(chunk).unwrap();
        loader.save_world(&world).unwrap();
        loader.unload_world("spawn").unwrap();

        let reloaded = loader
            .load_world("file", "spawn", WorldProperties::read_only())
            .unwrap();
        assert_eq!(reloaded.extra().get("time"), Some(&Tag::Long(6000)));
        assert_eq!(reloaded.chunk_count(), 2);
        assert_eq!(
            reloaded
                .chunk(ChunkPos::new(1, -1))
                .and_then(|c| c.section(3))
                .and_then(|s| s.legacy_block(0, 0, 0)),
            Some((4, 0))
        );
    }

    #[test]
    fn read_only_world_cannot_be_saved() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, &legacy_world("museum"));
        let loader = loader(&dir, false);

        let world = loader
            .load_world("file", "museum", WorldProperties::read_only())
            .unwrap();
        assert!(!lock_exists(&dir, "museum"));
        assert_eq!(
            loader.save_world(&world).unwrap_err(),
            WorldError::IllegalArgument("world 'museum' is read-only".into())
        );
    }

    #[test]
    fn unencodable_world_is_refused_and_the_file_kept() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, &legacy_world("spawn"));
        let before = fs::read(dir.path().join("spawn.world")).unwrap();
        let loader = loader(&dir, false);

        let mut world = loader
            .load_world("file", "spawn", WorldProperties::default())
            .unwrap();
        world
            .extra_mut()
            .insert("motd", Tag::String("x".repeat(70_000)));
        let err = loader.save_world(&world).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
        assert!(err.to_string().contains("cannot be encoded"), "{err}");
        assert_eq!(fs::read(dir.path().join("spawn.world")).unwrap(), before);
    }

    #[test]
    fn unloaded_world_cannot_be_saved_or_unloaded_again() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, &legacy_world("spawn"));
        let loader = loader(&dir, false);

        let world = loader
            .load_world("file", "spawn", WorldProperties::default())
            .unwrap();
        loader.unload_world("spawn").unwrap();
        assert_eq!(
            loader.unload_world("spawn").unwrap_err().kind(),
            ErrorKind::IllegalArgument
        );
        assert_eq!(
            loader.save_world(&world).unwrap_err(),
            WorldError::IllegalArgument("world 'spawn' is not loaded".into())
        );
    }

    // -----------------------------------------------------------------------
    // Configuration entries / startup
    // -----------------------------------------------------------------------

    #[test]
    fn malformed_entries_are_illegal_arguments() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, &legacy_world("spawn"));
        let loader = loader(&dir, false);

        let cases = [
            (
                WorldEntry::new("spawn").with_source("mysql"),
                "unknown backend 'mysql'",
            ),
            (
                WorldEntry::new("spawn").with_difficulty("insane"),
                "unknown difficulty 'insane'",
            ),
            (
                WorldEntry::new("spawn").with_spawn("abc"),
                "invalid spawn location 'abc'",
            ),
        ];
        for (entry, message) in cases {
            assert_eq!(
                loader.load_from_entry(&entry).unwrap_err(),
                WorldError::IllegalArgument(message.into())
            );
        }
        // None of them touched the backend.
        assert!(!lock_exists(&dir, "spawn"));
    }

    #[test]
    fn entry_properties_reach_the_world() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, &legacy_world("arena"));
        let loader = loader(&dir, false);

        let entry = WorldEntry::new("arena")
            .with_difficulty("Normal")
            .with_spawn(" 1.5 ,70, -2 ")
            .read_only(true);
        let world = loader.load_from_entry(&entry).unwrap();
        assert_eq!(world.properties().difficulty, Difficulty::Normal);
        assert_eq!(world.properties().spawn, SpawnPoint::new(1.5, 70.0, -2.0));
        assert!(world.is_read_only());
    }

    #[test]
    fn startup_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, &legacy_world("a"));
        store(&dir, &legacy_world("c"));
        store(&dir, &modern_world("d"));
        store(&dir, &legacy_world("f"));
        store(&dir, &legacy_world("skipped"));
        let loader = loader(&dir, false);

        let mut skipped = WorldEntry::new("skipped");
        skipped.load_on_startup = false;
        let entries = vec![
            WorldEntry::new("a"),
            WorldEntry::new("b"),
            WorldEntry::new("c").with_spawn("1, 2"),
            WorldEntry::new("d"),
            WorldEntry::new("e").with_source("mongo"),
            WorldEntry::new("f"),
            skipped,
        ];

        let report = loader.load_startup_worlds(&entries);
        assert_eq!(report.loaded_names(), vec!["a", "f"]);
        let kinds: Vec<(&str, ErrorKind)> = report
            .failures
            .iter()
            .map(|f| (f.world.as_str(), f.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("b", ErrorKind::UnknownWorld),
                ("c", ErrorKind::IllegalArgument),
                ("d", ErrorKind::UnsupportedWorld),
                ("e", ErrorKind::IllegalArgument),
            ]
        );
        assert!(report.failures[0].message.contains("does not exist"));
        assert!(!report.is_clean());
        assert!(!loader.locks().is_active("skipped"));
        assert_eq!(loader.locks().active_worlds(), vec!["a", "f"]);
    }

    #[test]
    fn startup_fails_a_repeated_name_even_after_the_first_failed() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, &legacy_world("late"));
        let loader = loader(&dir, false);

        // The first entry is malformed; the second must not stand in for it.
        let entries = vec![
            WorldEntry::new("late").with_spawn("nowhere"),
            WorldEntry::new("late"),
        ];
        let report = loader.load_startup_worlds(&entries);
        assert!(report.loaded.is_empty());
        assert_eq!(
            report.failures[1].message,
            "world 'late' is configured more than once"
        );
        assert!(!lock_exists(&dir, "late"));
    }
}
