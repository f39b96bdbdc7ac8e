use std::io::Write;

use pacycle_protocol::{ConfigError, ConfigProvider, DimensionKind, TomlConfigProvider};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_disk() {
    let file = write_config(
        r#"
[agent]
name = "agent-1"
required_subsystems = ["ACS", "IDN"]
seed = 7

[simulation]
host = "127.0.0.1"
port = 9100

[[dimensions]]
name = "count"
kind = "integer"

[[dimensions]]
name = "tag"
kind = "meta"
"#,
    );

    let provider = TomlConfigProvider::new(file.path());
    assert_eq!(provider.path(), file.path());

    let context = provider.load().unwrap();
    assert_eq!(context.agent.required_subsystems, vec!["ACS", "IDN"]);
    assert_eq!(context.agent.seed, Some(7));
    assert_eq!(context.agent.max_cycles, None);
    assert_eq!(context.simulation.unwrap().address(), "127.0.0.1:9100");
    let kinds: Vec<_> = context.dimensions.iter().map(|d| d.kind.clone()).collect();
    assert_eq!(kinds, vec![DimensionKind::Integer, DimensionKind::Meta]);
    assert!(context.parameters.is_empty());
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    match TomlConfigProvider::new(&path).load() {
        Err(ConfigError::Io { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected Io error, got {other:?}"),
    }
}

#[test]
fn test_explicit_path_wins_over_default() {
    let file = write_config("");
    let provider = TomlConfigProvider::resolve(Some(file.path().to_path_buf())).unwrap();
    assert_eq!(provider.path(), file.path());
}

#[test]
fn test_rejects_invalid_contexts() {
    let cases = [
        // no required subsystems
        "[agent]\nname = \"a\"\nrequired_subsystems = []\n",
        // duplicate required identity
        "[agent]\nname = \"a\"\nrequired_subsystems = [\"ACS\", \"ACS\"]\n",
        // zero watchdog
        "[agent]\nname = \"a\"\nrequired_subsystems = [\"ACS\"]\ncycle_timeout_ms = 0\n",
        // a cycle limit that forbids the first cycle
        "[agent]\nname = \"a\"\nrequired_subsystems = [\"ACS\"]\nmax_cycles = 0\n",
        // duplicate dimension names
        "[agent]\nname = \"a\"\nrequired_subsystems = [\"ACS\"]\n\
         [[dimensions]]\nname = \"x\"\nkind = \"integer\"\n\
         [[dimensions]]\nname = \"x\"\nkind = \"float\"\n",
        // node without values
        "[agent]\nname = \"a\"\nrequired_subsystems = [\"ACS\"]\n\
         [[dimensions]]\nname = \"x\"\nkind = \"node\"\nvalues = []\n",
        // inverted range
        "[agent]\nname = \"a\"\nrequired_subsystems = [\"ACS\"]\n\
         [[dimensions]]\nname = \"x\"\nkind = \"ranged_int\"\nmin = 4\nmax = 1\n",
    ];

    for source in cases {
        let file = write_config(source);
        let result = TomlConfigProvider::new(file.path()).load();
        assert!(
            matches!(result, Err(ConfigError::Invalid(_))),
            "accepted invalid context:\n{source}\n{result:?}"
        );
    }
}

#[test]
fn test_unparseable_file_is_parse_error() {
    let file = write_config("[agent\nname = ");
    assert!(matches!(
        TomlConfigProvider::new(file.path()).load(),
        Err(ConfigError::Parse(_))
    ));
}
