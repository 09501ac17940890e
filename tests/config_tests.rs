//! Configuration, property parsing and host version probe tests

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;
    use worldstore::{
        Difficulty, ErrorKind, HostError, HostVersion, SpawnPoint, StoreConfig, WorldEntry,
        WorldError,
    };

    // -----------------------------------------------------------------------
    // Spawn / difficulty
    // -----------------------------------------------------------------------

    #[test]
    fn spawn_parses_three_components() {
        let spawn: SpawnPoint = "0, 255, 0".parse().unwrap();
        assert_eq!(spawn, SpawnPoint::new(0.0, 255.0, 0.0));
        assert_eq!(spawn, SpawnPoint::default());
        assert_eq!("-1.5,64,2e2".parse::<SpawnPoint>().unwrap(), SpawnPoint::new(-1.5, 64.0, 200.0));
    }

    #[test]
    fn spawn_rejects_malformed_text() {
        for bad in ["abc", "1, 2", "1, 2, 3, 4", "1,,3", ""] {
            assert_eq!(
                bad.parse::<SpawnPoint>().unwrap_err(),
                WorldError::IllegalArgument(format!("invalid spawn location '{}'", bad)),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn spawn_display_parses_back() {
        let spawn = SpawnPoint::new(12.25, 80.0, -3.0);
        assert_eq!(spawn.to_string().parse::<SpawnPoint>().unwrap(), spawn);
    }

    #[test]
    fn difficulty_names() {
        assert_eq!("peaceful".parse::<Difficulty>().unwrap(), Difficulty::Peaceful);
        assert_eq!("HARD".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert_eq!(Difficulty::Normal.value(), 2);
        let err = "insane".parse::<Difficulty>().unwrap_err();
        assert_eq!(err.to_string(), "unknown difficulty 'insane'");
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
    }

    // -----------------------------------------------------------------------
    // Config file
    // -----------------------------------------------------------------------

    const SAMPLE: &str = r#"
data_dir = "/srv/worlds"
lock_stale_secs = 120
host_version = "org.bukkit.craftbukkit.v1_12_R1"

[[worlds]]
name = "spawn"

[[worlds]]
name = "arena"
source = "table"
difficulty = "hard"
spawn = "10, 70, -10"
load_on_startup = false
allow_monsters = false
read_only = true
"#;

    #[test]
    fn entries_take_defaults() {
        let config = StoreConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/worlds"));
        assert_eq!(config.lock_policy().stale_after, Duration::from_secs(120));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.load_timeout(), Duration::from_millis(30_000));
        assert_eq!(config.worlds.len(), 2);

        assert_eq!(config.worlds[0], WorldEntry::new("spawn"));
        let defaults = config.worlds[0].properties().unwrap();
        assert_eq!(defaults.spawn, SpawnPoint::new(0.0, 255.0, 0.0));
        assert_eq!(defaults.difficulty, Difficulty::Peaceful);
        assert!(defaults.allow_monsters && defaults.allow_animals && !defaults.read_only);

        let arena = &config.worlds[1];
        assert_eq!(arena.source, "table");
        assert!(!arena.load_on_startup);
        let props = arena.properties().unwrap();
        assert_eq!(props.difficulty, Difficulty::Hard);
        assert_eq!(props.spawn, SpawnPoint::new(10.0, 70.0, -10.0));
        assert!(!props.allow_monsters);
        assert!(props.allow_animals);
        assert!(props.read_only);
    }

    #[test]
    fn empty_config_is_default() {
        assert_eq!(StoreConfig::from_toml_str("").unwrap(), StoreConfig::default());
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worldstore.toml");
        fs::write(&path, SAMPLE).unwrap();

        std::env::set_var("WORLDSTORE__HEARTBEAT_SECS", "15");
        let config = StoreConfig::load(Some(path.as_path()));
        std::env::remove_var("WORLDSTORE__HEARTBEAT_SECS");

        let config = config.unwrap();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.lock_stale_secs, 120);
        assert_eq!(config.worlds.len(), 2);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StoreConfig::load(Some(dir.path().join("absent.toml").as_path())).is_err());
    }

    // -----------------------------------------------------------------------
    // Host version probe
    // -----------------------------------------------------------------------

    #[test]
    fn probe_uses_last_package_segment() {
        assert_eq!(
            HostVersion::probe("org.bukkit.craftbukkit.v1_12_R1").unwrap(),
            HostVersion::V1_12_R1
        );
        assert_eq!(HostVersion::probe("v1_8_R3").unwrap(), HostVersion::V1_8_R3);
        assert_eq!(
            HostVersion::probe("org.bukkit.craftbukkit.v1_15_R1").unwrap_err(),
            HostError::UnsupportedVersion("v1_15_R1".into())
        );
        assert_eq!(
            HostVersion::probe("org.bukkit.craftbukkit").unwrap_err().to_string(),
            "unsupported host version 'craftbukkit'"
        );
    }

    #[test]
    fn modern_encoding_starts_at_1_13() {
        let modern: Vec<HostVersion> = HostVersion::ALL
            .into_iter()
            .filter(|v| v.uses_modern_encoding())
            .collect();
        assert_eq!(
            modern,
            vec![HostVersion::V1_13_R1, HostVersion::V1_13_R2, HostVersion::V1_14_R1]
        );
        for v in HostVersion::ALL {
            assert_eq!(v.as_str().parse::<HostVersion>().unwrap(), v);
        }
    }

    #[test]
    fn only_backend_unavailable_is_retryable() {
        let retryable = WorldError::unavailable("file", "disk on fire");
        assert_eq!(retryable.kind(), ErrorKind::BackendUnavailable);
        assert!(retryable.kind().is_retryable());
        assert!(!WorldError::illegal("nope").kind().is_retryable());
        assert_eq!(ErrorKind::WorldInUse.to_string(), "world_in_use");
    }
}
