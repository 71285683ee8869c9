//! Text commands accepted on stdin by `ouichefs-evict start`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use eviction::{ControlSurface, VolumeStore};
use eviction::volume::memory::{MemoryVolume, VolumeImage};

const HELP: &str = "\
commands:
  <n> | clean <n>        run the active policy on mounted volume n
  clean-dir <n> <path>   evict one file from a directory of volume n
  policy <name>          select the active policy
  policies               list registered policies
  tree <n>               show the contents of volume n
  help                   show this message";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Clean(String),
    CleanDir { index: usize, path: String },
    Policy(String),
    Policies,
    Tree(usize),
    Help,
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            return Ok(None);
        };

        let command = match first {
            "clean" => Command::Clean(words.next().unwrap_or_default().to_string()),
            "clean-dir" => {
                let index = parse_index(words.next())?;
                let path = words
                    .next()
                    .ok_or_else(|| anyhow!("clean-dir needs a directory path"))?;
                Command::CleanDir {
                    index,
                    path: path.to_string(),
                }
            }
            "policy" => {
                let name = words.next().ok_or_else(|| anyhow!("policy needs a name"))?;
                Command::Policy(name.to_string())
            }
            "policies" => Command::Policies,
            "tree" => Command::Tree(parse_index(words.next())?),
            "help" => Command::Help,
            // A bare index is the clean command itself.
            other => Command::Clean(other.to_string()),
        };

        if let Some(extra) = words.next() {
            bail!("unexpected argument '{extra}'");
        }
        Ok(Some(command))
    }
}

fn parse_index(word: Option<&str>) -> Result<usize> {
    let word = word.ok_or_else(|| anyhow!("missing volume index"))?;
    word.parse()
        .with_context(|| format!("invalid volume index '{word}'"))
}

/// Read a JSON volume image from disk.
pub fn load_image(path: &Path) -> Result<MemoryVolume> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read volume image {}", path.display()))?;
    let image: VolumeImage = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse volume image {}", path.display()))?;
    MemoryVolume::from_image(&image)
        .with_context(|| format!("Failed to build volume from {}", path.display()))
}

/// Runs commands against the mount table. Images loaded by the binary are
/// kept by label so `tree` and `clean-dir` can reach their contents; volume
/// indices always come from the mount table.
pub struct Operator {
    control: ControlSurface,
    images: HashMap<String, Arc<MemoryVolume>>,
}

impl Operator {
    pub fn new(control: ControlSurface) -> Self {
        Self {
            control,
            images: HashMap::new(),
        }
    }

    pub fn control(&self) -> &ControlSurface {
        &self.control
    }

    /// Mount an image. Labels must be unique among mounted images.
    pub fn mount(&mut self, volume: Arc<MemoryVolume>) -> Result<usize> {
        let label = volume.label().to_string();
        if self.control.mounts().labels().contains(&label) {
            bail!("a volume labelled '{label}' is already mounted");
        }
        self.images.insert(label, Arc::clone(&volume));
        Ok(self.control.mounts().mount(volume))
    }

    fn volume(&self, index: usize) -> Result<&Arc<MemoryVolume>> {
        let partition = self
            .control
            .mounts()
            .get(index)
            .ok_or_else(|| anyhow!("no volume at index {index}"))?;
        let label = partition.label();
        self.images
            .get(label)
            .ok_or_else(|| anyhow!("volume {index} ('{label}') has no loaded image"))
    }

    /// Run one input line, returning what to print.
    pub fn execute(&self, line: &str) -> Result<Option<String>> {
        let Some(command) = Command::parse(line)? else {
            return Ok(None);
        };

        let output = match command {
            Command::Clean(input) => self.control.write_clean(&input)?.to_string(),
            Command::CleanDir { index, path } => {
                let volume = self.volume(index)?;
                let dir = volume
                    .lookup(&path)
                    .ok_or_else(|| anyhow!("no such directory '{path}'"))?;
                let parent = volume
                    .stat(dir)
                    .ok_or_else(|| anyhow!("no such directory '{path}'"))?;
                let files = volume
                    .directory(dir)
                    .ok_or_else(|| anyhow!("'{path}' is not a directory"))?;
                let victim = self
                    .control
                    .registry()
                    .active()
                    .clean_dir(&**volume, &parent, &files)?;
                format!("removed '{}' (inode {}, {} bytes)", victim.name, victim.id, victim.size)
            }
            Command::Policy(name) => {
                self.control.registry().select(&name)?;
                format!("active policy: {name}")
            }
            Command::Policies => {
                let registry = self.control.registry();
                let active = registry.active_name();
                registry
                    .names()
                    .into_iter()
                    .map(|name| {
                        let marker = if name == active { "*" } else { " " };
                        format!("{marker} {name}")
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Command::Tree(index) => self.volume(index)?.render_tree().trim_end().to_string(),
            Command::Help => HELP.to_string(),
        };

        Ok(Some(output))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use eviction::in_use::OpenCountDetector;
    use eviction::policy::size::SizePolicy;
    use eviction::{MountTable, PolicyRegistry};

    use super::*;

    fn operator() -> Operator {
        let registry = Arc::new(PolicyRegistry::new());
        registry
            .register(Arc::new(SizePolicy::new(Arc::new(OpenCountDetector))))
            .unwrap();
        Operator::new(ControlSurface::new(Arc::new(MountTable::new()), registry))
    }

    const IMAGE: &str = r#"{
        "label": "smol.img",
        "entries": [
            { "kind": "file", "name": "small", "size": 10 },
            { "kind": "dir", "name": "logs", "entries": [
                { "kind": "file", "name": "big", "size": 4096 },
                { "kind": "file", "name": "mid", "size": 100 }
            ] }
        ]
    }"#;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("  ").unwrap(), None);
        assert_eq!(
            Command::parse("0").unwrap(),
            Some(Command::Clean("0".to_string()))
        );
        assert_eq!(
            Command::parse("clean 1").unwrap(),
            Some(Command::Clean("1".to_string()))
        );
        assert_eq!(
            Command::parse("clean-dir 0 /logs").unwrap(),
            Some(Command::CleanDir {
                index: 0,
                path: "/logs".to_string()
            })
        );
        assert_eq!(
            Command::parse("policy lru").unwrap(),
            Some(Command::Policy("lru".to_string()))
        );
        assert_eq!(Command::parse("tree 2").unwrap(), Some(Command::Tree(2)));
        assert!(Command::parse("tree x").is_err());
        assert!(Command::parse("policy").is_err());
        assert!(Command::parse("policies now").is_err());
    }

    #[test]
    fn test_load_image_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(IMAGE.as_bytes()).unwrap();

        let volume = load_image(file.path()).unwrap();

        assert!(volume.exists("/logs/big"));
        assert!(volume.exists("/small"));
    }

    #[test]
    fn test_load_image_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();

        let Err(err) = load_image(file.path()) else {
            panic!("garbage image should not load");
        };

        assert!(err.to_string().contains("Failed to parse volume image"));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_clean_removes_largest_file() {
        let mut operator = operator();
        let volume: VolumeImage = serde_json::from_str(IMAGE).unwrap();
        let volume = Arc::new(MemoryVolume::from_image(&volume).unwrap());
        operator.mount(Arc::clone(&volume)).unwrap();

        let output = operator.execute("0").unwrap().unwrap();

        assert!(output.starts_with("removed 'big'"));
        assert!(!volume.exists("/logs/big"));
    }

    #[test]
    fn test_clean_dir_command() {
        let mut operator = operator();
        let volume: VolumeImage = serde_json::from_str(IMAGE).unwrap();
        let volume = Arc::new(MemoryVolume::from_image(&volume).unwrap());
        operator.mount(Arc::clone(&volume)).unwrap();

        operator.execute("clean-dir 0 /").unwrap();

        assert!(!volume.exists("/small"));
        assert!(volume.exists("/logs/big"));
    }

    fn volume_with(label: &str, file: &str) -> Arc<MemoryVolume> {
        let volume = Arc::new(MemoryVolume::new(label));
        volume.create_file(eviction::node::ROOT_ID, file, 10).unwrap();
        volume
    }

    #[test]
    fn test_indices_follow_mount_table() {
        let mut operator = operator();
        let first = volume_with("first.img", "one");
        let second = volume_with("second.img", "two");
        operator.mount(Arc::clone(&first)).unwrap();
        operator.mount(Arc::clone(&second)).unwrap();

        assert!(operator.control().mounts().unmount("first.img"));

        let tree = operator.execute("tree 0").unwrap().unwrap();
        assert!(tree.starts_with("second.img"));
        assert!(operator.execute("tree 1").is_err());

        operator.execute("clean-dir 0 /").unwrap();
        assert!(!second.exists("/two"));
        assert!(first.exists("/one"));
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let mut operator = operator();
        operator.mount(volume_with("smol.img", "a")).unwrap();

        let err = operator.mount(volume_with("smol.img", "b")).unwrap_err();

        assert!(err.to_string().contains("already mounted"));
        assert_eq!(operator.control().mounts().len(), 1);
    }

    #[test]
    fn test_partition_without_image() {
        let operator = operator();
        operator.control().mounts().mount_without_superblock("bare.img");

        let err = operator.execute("tree 0").unwrap_err();

        assert!(err.to_string().contains("has no loaded image"));
    }

    #[test]
    fn test_policy_commands() {
        let operator = operator();

        assert!(operator.execute("policy lru").is_err());
        operator.execute("policy default").unwrap();

        let listing = operator.execute("policies").unwrap().unwrap();
        assert_eq!(listing, "* default\n  size");
    }

    #[test]
    fn test_clean_rejects_bad_index() {
        let operator = operator();

        let err = operator.execute("clean 3").unwrap_err();
        assert!(err.to_string().contains("no partition at index 3"));
        assert!(operator.execute("clean -1").is_err());
        assert!(operator.execute("clean abc").is_err());
    }
}
