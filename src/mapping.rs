//! Human readable names for things and actions, and the definition of a node's own logical
//!  addresses. These are read from three CSV files in a mapping directory:
//!
//! * `all_things.csv`: `name,thing_id`
//! * `all_actions.csv`: `thing_name,action_name,action_id`
//! * `define_this.csv`: `thing_name,instance_id` - one line per logical address this node owns
//!
//! Numbers are decimal or `0x`-prefixed hex. Blank lines and lines starting with `#` are
//!  skipped, and so are malformed lines (with a warning). A missing file is the same as an
//!  empty file.

use std::path::Path;

use anyhow::{anyhow, Context};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::messaging::logical_addr::LogicalAddr;

pub const THINGS_FILE: &str = "all_things.csv";
pub const ACTIONS_FILE: &str = "all_actions.csv";
pub const DEFINES_FILE: &str = "define_this.csv";

#[derive(Debug, Default)]
pub struct NameRegistry {
    thing_ids: FxHashMap<String, u16>,
    thing_names: FxHashMap<u16, String>,
    action_ids: FxHashMap<String, FxHashMap<String, u8>>,
    action_names: FxHashMap<String, FxHashMap<u8, String>>,
    local_identities: Vec<LogicalAddr>,
}

impl NameRegistry {
    pub fn new() -> NameRegistry {
        Default::default()
    }

    /// loads the mapping files with their default names from a directory
    pub fn load_dir(dir: &Path) -> anyhow::Result<NameRegistry> {
        Self::load(&dir.join(THINGS_FILE), &dir.join(ACTIONS_FILE), &dir.join(DEFINES_FILE))
    }

    pub fn load(things: &Path, actions: &Path, defines: &Path) -> anyhow::Result<NameRegistry> {
        Ok(Self::from_csv(
            &read_optional(things)?,
            &read_optional(actions)?,
            &read_optional(defines)?,
        ))
    }

    /// Builds a registry from the files' contents. Things are read first since the other
    ///  files refer to things by name.
    pub fn from_csv(things: &str, actions: &str, defines: &str) -> NameRegistry {
        let mut result = NameRegistry::new();
        for (line_no, fields) in csv_lines(things) {
            if let Err(e) = result.add_thing(&fields) {
                warn!("{}:{}: {} - skipping", THINGS_FILE, line_no, e);
            }
        }
        for (line_no, fields) in csv_lines(actions) {
            if let Err(e) = result.add_action(&fields) {
                warn!("{}:{}: {} - skipping", ACTIONS_FILE, line_no, e);
            }
        }
        for (line_no, fields) in csv_lines(defines) {
            if let Err(e) = result.add_define(&fields) {
                warn!("{}:{}: {} - skipping", DEFINES_FILE, line_no, e);
            }
        }

        debug!("loaded {} things, {} local identities", result.thing_ids.len(), result.local_identities.len());
        result
    }

    fn add_thing(&mut self, fields: &[&str]) -> anyhow::Result<()> {
        let [name, id] = fields else {
            return Err(anyhow!("expected 'name,thing_id'"));
        };
        let id = parse_number(id)
            .and_then(|n| u16::try_from(n).map_err(|_| anyhow!("thing id {} out of range", n)))?;

        if let Some(prev) = self.thing_ids.insert(name.to_string(), id) {
            self.thing_names.remove(&prev);
        }
        self.thing_names.insert(id, name.to_string());
        Ok(())
    }

    fn add_action(&mut self, fields: &[&str]) -> anyhow::Result<()> {
        let [thing_name, action_name, id] = fields else {
            return Err(anyhow!("expected 'thing_name,action_name,action_id'"));
        };
        if !self.thing_ids.contains_key(*thing_name) {
            return Err(anyhow!("unknown thing {}", thing_name));
        }
        let id = parse_u8(id)?;

        self.action_ids.entry(thing_name.to_string()).or_default()
            .insert(action_name.to_string(), id);
        self.action_names.entry(thing_name.to_string()).or_default()
            .insert(id, action_name.to_string());
        Ok(())
    }

    fn add_define(&mut self, fields: &[&str]) -> anyhow::Result<()> {
        let [thing_name, instance_id] = fields else {
            return Err(anyhow!("expected 'thing_name,instance_id'"));
        };
        let thing = self.resolve_thing(thing_name)?;
        let addr = LogicalAddr::new(thing, parse_u8(instance_id)?);
        if addr.is_reserved() {
            return Err(anyhow!("{:?} is reserved", addr));
        }
        if !self.local_identities.contains(&addr) {
            self.local_identities.push(addr);
        }
        Ok(())
    }

    pub fn thing_id(&self, name: &str) -> Option<u16> {
        self.thing_ids.get(name).copied()
    }

    pub fn thing_name(&self, thing: u16) -> Option<&str> {
        self.thing_names.get(&thing).map(|s| s.as_str())
    }

    pub fn action_id(&self, thing_name: &str, action_name: &str) -> Option<u8> {
        self.action_ids.get(thing_name)?
            .get(action_name)
            .copied()
    }

    pub fn action_name(&self, thing_name: &str, action: u8) -> Option<&str> {
        self.action_names.get(thing_name)?
            .get(&action)
            .map(|s| s.as_str())
    }

    /// the logical addresses defined for this node, in file order
    pub fn local_identities(&self) -> &[LogicalAddr] {
        &self.local_identities
    }

    /// a thing given as a number or a name
    pub fn resolve_thing(&self, s: &str) -> anyhow::Result<u16> {
        if let Ok(n) = parse_number(s) {
            return u16::try_from(n).map_err(|_| anyhow!("thing id {} out of range", n));
        }
        self.thing_id(s)
            .ok_or_else(|| anyhow!("unknown thing {}", s))
    }

    /// an action given as a number or as a name that is defined for the thing
    pub fn resolve_action(&self, thing: u16, s: &str) -> anyhow::Result<u8> {
        if let Ok(n) = parse_number(s) {
            return u8::try_from(n).map_err(|_| anyhow!("action {} out of range", n));
        }
        self.thing_name(thing)
            .and_then(|thing_name| self.action_id(thing_name, s))
            .ok_or_else(|| anyhow!("unknown action {} for thing {:04X}", s, thing))
    }
}

fn read_optional(path: &Path) -> anyhow::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "mapping file not found - treating it as empty");
            Ok(String::new())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

/// non-empty, non-comment lines split into trimmed fields, with 1-based line numbers
fn csv_lines(content: &str) -> impl Iterator<Item = (usize, Vec<&str>)> {
    content.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_no, line)| (line_no, line.split(',').map(str::trim).collect()))
}

/// decimal or `0x`-prefixed hex
pub fn parse_number(s: &str) -> anyhow::Result<u32> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| anyhow!("not a number: '{}'", s))
}

pub fn parse_u8(s: &str) -> anyhow::Result<u8> {
    let n = parse_number(s)?;
    u8::try_from(n).map_err(|_| anyhow!("{} does not fit into a byte", n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const THINGS: &str = "
# name,thing_id
lamp,0x0010
  door , 32
broken
bad,abc
huge,70000
";

    const ACTIONS: &str = "
lamp,on,1
lamp,off,0x02
door,open,1
ghost,boo,1
lamp,dim,300
";

    const DEFINES: &str = "
lamp,2
door,0x07
lamp,2
ghost,1
lamp,x
";

    fn registry() -> NameRegistry {
        NameRegistry::from_csv(THINGS, ACTIONS, DEFINES)
    }

    #[test]
    fn test_things() {
        let registry = registry();
        assert_eq!(registry.thing_id("lamp"), Some(0x10));
        assert_eq!(registry.thing_id("door"), Some(32));
        assert_eq!(registry.thing_id("broken"), None);
        assert_eq!(registry.thing_id("bad"), None);
        assert_eq!(registry.thing_id("huge"), None);
        assert_eq!(registry.thing_name(0x10), Some("lamp"));
        assert_eq!(registry.thing_name(99), None);
    }

    #[test]
    fn test_actions() {
        let registry = registry();
        assert_eq!(registry.action_id("lamp", "on"), Some(1));
        assert_eq!(registry.action_id("lamp", "off"), Some(2));
        assert_eq!(registry.action_id("door", "open"), Some(1));
        assert_eq!(registry.action_id("door", "on"), None);
        assert_eq!(registry.action_id("ghost", "boo"), None);
        assert_eq!(registry.action_id("lamp", "dim"), None);
        assert_eq!(registry.action_name("lamp", 2), Some("off"));
        assert_eq!(registry.action_name("door", 2), None);
    }

    #[test]
    fn test_local_identities() {
        assert_eq!(registry().local_identities(), &[LogicalAddr::new(0x10, 2), LogicalAddr::new(32, 7)]);
    }

    #[test]
    fn test_reserved_define_is_skipped() {
        let registry = NameRegistry::from_csv("all,0xFFFF", "", "all,255\nall,1");
        assert_eq!(registry.local_identities(), &[LogicalAddr::new(0xFFFF, 1)]);
    }

    #[rstest]
    #[case::decimal("16", Some(0x10))]
    #[case::hex("0x10", Some(0x10))]
    #[case::upper_hex("0X1f", Some(0x1F))]
    #[case::name("lamp", Some(0x10))]
    #[case::unknown_name("fridge", None)]
    #[case::out_of_range("65536", None)]
    fn test_resolve_thing(#[case] s: &str, #[case] expected: Option<u16>) {
        assert_eq!(registry().resolve_thing(s).ok(), expected);
    }

    #[rstest]
    #[case::number(0x10, "5", Some(5))]
    #[case::name(0x10, "off", Some(2))]
    #[case::name_of_other_thing(32, "off", None)]
    #[case::unnamed_thing(99, "off", None)]
    #[case::out_of_range(0x10, "256", None)]
    fn test_resolve_action(#[case] thing: u16, #[case] s: &str, #[case] expected: Option<u8>) {
        assert_eq!(registry().resolve_action(thing, s).ok(), expected);
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let dir = std::env::temp_dir().join("beeton-mapping-test-does-not-exist");
        let registry = NameRegistry::load_dir(&dir).unwrap();
        assert_eq!(registry.thing_id("lamp"), None);
        assert!(registry.local_identities().is_empty());
    }

    #[test]
    fn test_load_dir() {
        let dir = std::env::temp_dir().join(format!("beeton-mapping-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(THINGS_FILE), THINGS).unwrap();
        std::fs::write(dir.join(DEFINES_FILE), DEFINES).unwrap();

        let registry = NameRegistry::load_dir(&dir).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(registry.thing_id("door"), Some(32));
        assert_eq!(registry.action_id("lamp", "on"), None);
        assert_eq!(registry.local_identities().len(), 2);
    }
}
