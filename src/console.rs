//! A line based command console for operating a leader node, e.g. from a host computer over a
//!  serial link or stdin. Each command is one line, and it is answered with one or more lines.
//!
//! ```ascii
//! GETTHINGS                                   list the address book
//! GETFILE,<name>                              dump a file from the console's file directory
//! SEND,<reliable>,<thing>,<id>,<action>[,<payload byte>...]
//! PACKETTEST                                  encode a sample packet and decode it again
//! ```
//!
//! Things and actions can be given as numbers or as names from the [NameRegistry]. Any other
//!  line is echoed.

use std::path::PathBuf;

use anyhow::{anyhow, bail};
use tokio::time::Instant;
use tracing::debug;

use crate::mapping::{parse_u8, NameRegistry};
use crate::messaging::engine::ProtocolEngine;
use crate::messaging::logical_addr::LogicalAddr;
use crate::messaging::node_addr::NodeAddr;
use crate::messaging::packet::{encode, Packet, PacketFlags};
use crate::messaging::transport::MeshTransport;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Command {
    GetThings,
    GetFile(String),
    Send {
        reliable: bool,
        logical_addr: LogicalAddr,
        action: u8,
        payload: Vec<u8>,
    },
    PacketTest,
    Echo(String),
}

impl Command {
    pub fn parse(line: &str, registry: &NameRegistry) -> anyhow::Result<Command> {
        let line = line.trim();

        if line.eq_ignore_ascii_case("GETTHINGS") {
            return Ok(Command::GetThings);
        }
        if line.eq_ignore_ascii_case("PACKETTEST") {
            return Ok(Command::PacketTest);
        }
        if let Some(name) = line.strip_prefix("GETFILE,") {
            return Ok(Command::GetFile(name.trim().to_string()));
        }
        if let Some(args) = line.strip_prefix("SEND,") {
            return Self::parse_send(args, registry);
        }
        Ok(Command::Echo(line.to_string()))
    }

    fn parse_send(args: &str, registry: &NameRegistry) -> anyhow::Result<Command> {
        let parts = args.split(',').map(str::trim).collect::<Vec<_>>();
        if parts.len() < 4 {
            bail!("usage SEND,reliable,thing,id,action[,payload...]");
        }

        let reliable = match parts[0] {
            "1" | "true" => true,
            "0" | "false" => false,
            other => bail!("reliable must be 0 or 1, was '{}'", other),
        };
        let thing = registry.resolve_thing(parts[1])?;
        let instance_id = parse_u8(parts[2])?;
        let action = registry.resolve_action(thing, parts[3])?;
        let payload = parts[4..].iter()
            .map(|s| parse_u8(s))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Command::Send {
            reliable,
            logical_addr: LogicalAddr::new(thing, instance_id),
            action,
            payload,
        })
    }
}

pub struct Console {
    registry: NameRegistry,
    file_dir: PathBuf,
}

impl Console {
    pub fn new(registry: NameRegistry, file_dir: impl Into<PathBuf>) -> Console {
        Console {
            registry,
            file_dir: file_dir.into(),
        }
    }

    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    /// executes a command line, returning the response lines
    pub fn handle_line<T: MeshTransport>(&self, line: &str, engine: &mut ProtocolEngine<T>) -> Vec<String> {
        debug!(line, "console command");

        match Command::parse(line, &self.registry) {
            Ok(Command::GetThings) => self.get_things(engine),
            Ok(Command::GetFile(name)) => self.get_file(&name),
            Ok(Command::Send { reliable, logical_addr, action, payload }) => {
                match engine.try_send(reliable, logical_addr, action, &payload) {
                    Ok(sequence) => vec![format!("SENT seq={}", sequence)],
                    Err(e) => vec![format!("ERROR: {}", e)],
                }
            }
            Ok(Command::PacketTest) => vec![Self::packet_test(engine.transport().own_addr())],
            Ok(Command::Echo(line)) => vec![format!("ECHO: {}", line)],
            Err(e) => vec![format!("ERROR: {}", e)],
        }
    }

    fn get_things<T: MeshTransport>(&self, engine: &ProtocolEngine<T>) -> Vec<String> {
        let now = Instant::now();

        let mut result = vec!["BEGIN_THINGS".to_string()];
        for (logical_addr, owner) in engine.address_book().entries() {
            let last_seen = match engine.transport().last_contact(owner) {
                Some(t) => format!("{} ms ago", now.saturating_duration_since(t).as_millis()),
                None => "never".to_string(),
            };
            result.push(format!("THING {}, owner={}, lastSeen={}", logical_addr, owner, last_seen));
        }
        result.push("END_THINGS".to_string());
        result
    }

    /// round trip of a sample packet through the codec
    fn packet_test(myself: NodeAddr) -> String {
        let raw = encode(PacketFlags::empty(), 0, LogicalAddr::new(0x1234, 1), 42, &[1, 2, 3], myself);
        match Packet::deser(&raw) {
            Ok(packet) => format!("origin={} thing={:04X} id={} action={} len={}",
                packet.origin, packet.logical_addr.thing, packet.logical_addr.instance_id, packet.action, packet.payload.len()),
            Err(e) => format!("ERROR: {}", e),
        }
    }

    fn get_file(&self, name: &str) -> Vec<String> {
        match self.read_file(name) {
            Ok(Some(content)) => {
                let mut result = vec![format!("BEGIN_FILE,{}", name)];
                result.extend(content.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string));
                result.push(format!("END_FILE,{}", name));
                result
            }
            Ok(None) => vec![format!("ERROR: File {} not found", name)],
            Err(e) => vec![format!("ERROR: {}", e)],
        }
    }

    fn read_file(&self, name: &str) -> anyhow::Result<Option<String>> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(anyhow!("invalid file name '{}'", name));
        }

        match std::fs::read_to_string(self.file_dir.join(name)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::test_util::node::test_node_addr_from_number;
    use crate::test_util::transport::RecordingTransport;
    use rstest::rstest;
    use std::time::Duration;

    fn registry() -> NameRegistry {
        NameRegistry::from_csv("lamp,0x10", "lamp,on,1\nlamp,off,2", "")
    }

    #[rstest]
    #[case::get_things("GETTHINGS", Command::GetThings)]
    #[case::get_things_lower_case(" getthings ", Command::GetThings)]
    #[case::get_file("GETFILE,all_things.csv", Command::GetFile("all_things.csv".to_string()))]
    #[case::send_numeric("SEND,1,16,2,5,9", Command::Send { reliable: true, logical_addr: LogicalAddr::new(0x10, 2), action: 5, payload: vec![9] })]
    #[case::send_names("SEND,0,lamp,0x02,off", Command::Send { reliable: false, logical_addr: LogicalAddr::new(0x10, 2), action: 2, payload: vec![] })]
    #[case::send_payload("SEND,true,0x10,1,on,1,0x02,255", Command::Send { reliable: true, logical_addr: LogicalAddr::new(0x10, 1), action: 1, payload: vec![1, 2, 255] })]
    #[case::packet_test("PACKETTEST", Command::PacketTest)]
    #[case::echo("hello", Command::Echo("hello".to_string()))]
    #[case::send_without_comma("SEND", Command::Echo("SEND".to_string()))]
    fn test_parse(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(Command::parse(line, &registry()).unwrap(), expected);
    }

    #[rstest]
    #[case::too_few_args("SEND,1,16,2")]
    #[case::bad_reliable("SEND,yes,16,2,5")]
    #[case::unknown_thing("SEND,1,fridge,2,5")]
    #[case::unknown_action("SEND,1,lamp,2,blink")]
    #[case::instance_out_of_range("SEND,1,16,256,5")]
    #[case::payload_out_of_range("SEND,1,16,2,5,300")]
    fn test_parse_invalid(#[case] line: &str) {
        assert!(Command::parse(line, &registry()).is_err());
    }

    fn leader_engine() -> ProtocolEngine<RecordingTransport> {
        ProtocolEngine::new(RecordingTransport::leader(test_node_addr_from_number(1)), EngineConfig::default()).unwrap()
    }

    fn announce(engine: &mut ProtocolEngine<RecordingTransport>, joiner: u16, identities: &[LogicalAddr]) {
        let mut payload = Vec::new();
        LogicalAddr::ser_announcement(identities, &mut payload);
        let raw = encode(PacketFlags::RELIABLE, 1, LogicalAddr::ANNOUNCEMENT, 0xFF, &payload, test_node_addr_from_number(joiner));
        engine.on_datagram(test_node_addr_from_number(joiner), &raw);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_things() {
        let mut engine = leader_engine();
        announce(&mut engine, 2, &[LogicalAddr::new(0x10, 2)]);
        announce(&mut engine, 3, &[LogicalAddr::new(0x0A, 1)]);
        engine.transport().record_contact(test_node_addr_from_number(2), Instant::now());
        tokio::time::advance(Duration::from_millis(150)).await;

        let console = Console::new(registry(), std::env::temp_dir());
        assert_eq!(console.handle_line("GETTHINGS", &mut engine), vec![
            "BEGIN_THINGS".to_string(),
            "THING 000A:1, owner=fd00::3, lastSeen=never".to_string(),
            "THING 0010:2, owner=fd00::2, lastSeen=150 ms ago".to_string(),
            "END_THINGS".to_string(),
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send() {
        let mut engine = leader_engine();
        announce(&mut engine, 2, &[LogicalAddr::new(0x10, 2)]);
        let console = Console::new(registry(), std::env::temp_dir());

        assert_eq!(console.handle_line("SEND,1,lamp,2,on,9", &mut engine), vec!["SENT seq=1".to_string()]);
        assert_eq!(console.handle_line("SEND,0,lamp,2,off", &mut engine), vec!["SENT seq=0".to_string()]);
        assert_eq!(console.handle_line("SEND,0,lamp,3,off", &mut engine), vec!["ERROR: no owner is known for the logical address".to_string()]);
        assert_eq!(console.handle_line("SEND,0,0xFFFF,255,1", &mut engine), vec!["ERROR: the announcement address is reserved".to_string()]);

        let sent = engine.transport().sent_packets();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, test_node_addr_from_number(2));
        assert_eq!(sent[0].1.action, 1);
        assert_eq!(sent[0].1.payload.as_ref(), &[9]);
        assert_eq!(engine.num_pending(), 1);
    }

    #[test]
    fn test_echo() {
        let mut engine = leader_engine();
        let console = Console::new(registry(), std::env::temp_dir());
        assert_eq!(console.handle_line("PING", &mut engine), vec!["ECHO: PING".to_string()]);
    }

    #[test]
    fn test_packet_test() {
        let mut engine = leader_engine();
        let console = Console::new(registry(), std::env::temp_dir());
        assert_eq!(console.handle_line("PACKETTEST", &mut engine), vec!["origin=fd00::1 thing=1234 id=1 action=42 len=3".to_string()]);
    }

    #[test]
    fn test_get_file() {
        let dir = std::env::temp_dir().join(format!("beeton-console-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("notes.csv"), "a,1\n\n  b,2  \n").unwrap();

        let mut engine = leader_engine();
        let console = Console::new(registry(), &dir);
        let found = console.handle_line("GETFILE,notes.csv", &mut engine);
        let missing = console.handle_line("GETFILE,other.csv", &mut engine);
        let escaping = console.handle_line("GETFILE,../notes.csv", &mut engine);
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(found, vec![
            "BEGIN_FILE,notes.csv".to_string(),
            "a,1".to_string(),
            "b,2".to_string(),
            "END_FILE,notes.csv".to_string(),
        ]);
        assert_eq!(missing, vec!["ERROR: File other.csv not found".to_string()]);
        assert_eq!(escaping, vec!["ERROR: invalid file name '../notes.csv'".to_string()]);
    }
}
