//! Command Catalog
//!
//! The ordered set of commands polled every cycle, fixed for a whole run.

use crate::error::PollError;
use obd_protocol::{DiagnosticCommand, DiagnosticLink};
use obd_storage::TIMESTAMP_KEY;
use std::collections::HashSet;
use tracing::{info, warn};

/// A command together with the record field it is written to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    key: String,
    command: DiagnosticCommand,
}

impl CatalogEntry {
    pub fn new(key: impl Into<String>, command: DiagnosticCommand) -> Self {
        Self {
            key: key.into(),
            command,
        }
    }

    /// Record field name
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn command(&self) -> &DiagnosticCommand {
        &self.command
    }
}

/// Where the catalog comes from
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// Curated field name to command mapping, used as declared
    Fixed(Vec<CatalogEntry>),
    /// Whatever the connected vehicle reports as supported
    Discovered,
}

/// Ordered, duplicate-free list of commands to poll
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Keep entries in declaration order, dropping repeated field names
    pub fn fixed(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|entry| accept_key(&mut seen, entry.key()))
            .collect();
        Self { entries }
    }

    /// Core commands sorted by name, then manufacturer commands sorted by name
    pub fn from_commands(commands: impl IntoIterator<Item = DiagnosticCommand>) -> Self {
        let (mut manufacturer, mut core): (Vec<_>, Vec<_>) =
            commands.into_iter().partition(DiagnosticCommand::is_manufacturer);
        core.sort_by(|a, b| a.name().cmp(b.name()));
        manufacturer.sort_by(|a, b| a.name().cmp(b.name()));

        let mut seen = HashSet::new();
        let entries = core
            .into_iter()
            .chain(manufacturer)
            .filter(|command| accept_key(&mut seen, command.name()))
            .map(|command| CatalogEntry::new(command.name().to_string(), command))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(CatalogEntry::key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn manufacturer_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.command().is_manufacturer())
            .count()
    }

    pub fn core_count(&self) -> usize {
        self.len() - self.manufacturer_count()
    }
}

fn accept_key(seen: &mut HashSet<String>, key: &str) -> bool {
    if key == TIMESTAMP_KEY {
        warn!("Field name {:?} is reserved, skipping command", key);
        return false;
    }
    if !seen.insert(key.to_string()) {
        warn!("Duplicate field name {:?}, keeping the first", key);
        return false;
    }
    true
}

/// Resolve the catalog for this run.
///
/// Discovery that yields nothing falls back to every command the link knows;
/// an error or an empty fallback is fatal.
pub async fn resolve<L>(source: &CatalogSource, link: &mut L) -> Result<Catalog, PollError>
where
    L: DiagnosticLink + ?Sized,
{
    let catalog = match source {
        CatalogSource::Fixed(entries) => Catalog::fixed(entries.iter().cloned()),
        CatalogSource::Discovered => {
            let supported = link
                .supported_commands()
                .await
                .map_err(|e| PollError::Discovery(e.to_string()))?;
            info!("Raw supported commands count: {}", supported.len());

            let commands = if supported.is_empty() {
                warn!("Vehicle reported no supported commands, trying every known command");
                link.known_commands()
            } else {
                supported
            };
            Catalog::from_commands(commands)
        }
    };

    if catalog.is_empty() {
        return Err(PollError::Discovery("no commands to poll".to_string()));
    }

    info!(
        "{} core commands, {} manufacturer commands",
        catalog.core_count(),
        catalog.manufacturer_count()
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLink;
    use obd_protocol::{CommandRegistry, Decoder, ObdError};
    use proptest::prelude::*;

    fn standard(name: &str) -> DiagnosticCommand {
        CommandRegistry::standard().lookup(name).unwrap().clone()
    }

    fn manufacturer(name: &str, did: u16) -> DiagnosticCommand {
        DiagnosticCommand::manufacturer(name.to_string(), did, Decoder::Raw)
    }

    #[test]
    fn test_core_then_manufacturer_each_sorted() {
        let catalog = Catalog::from_commands(vec![
            manufacturer("OIL_LIFE", 0x1A2B),
            standard("SPEED"),
            manufacturer("BATTERY_SOH", 0x0101),
            standard("COOLANT_TEMP"),
            standard("RPM"),
        ]);

        let keys: Vec<_> = catalog.keys().collect();
        assert_eq!(keys, vec!["COOLANT_TEMP", "RPM", "SPEED", "BATTERY_SOH", "OIL_LIFE"]);
        assert_eq!(catalog.core_count(), 3);
        assert_eq!(catalog.manufacturer_count(), 2);
    }

    #[test]
    fn test_fixed_keeps_declaration_order() {
        let catalog = Catalog::fixed(vec![
            CatalogEntry::new("rpm", standard("RPM")),
            CatalogEntry::new("speed_kph", standard("SPEED")),
            CatalogEntry::new("dtc", standard("GET_DTC")),
            CatalogEntry::new("rpm", standard("THROTTLE_POS")),
            CatalogEntry::new("timestamp", standard("COOLANT_TEMP")),
        ]);

        let keys: Vec<_> = catalog.keys().collect();
        assert_eq!(keys, vec!["rpm", "speed_kph", "dtc"]);
        assert_eq!(catalog.entries()[0].command().name(), "RPM");
    }

    #[tokio::test]
    async fn test_fixed_source_issues_no_discovery() {
        let mut link = ScriptedLink::new().with_supported(Err(ObdError::AdapterNotResponding));
        let source = CatalogSource::Fixed(vec![CatalogEntry::new("rpm", standard("RPM"))]);

        let catalog = resolve(&source, &mut link).await.unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_discovery_error_is_fatal() {
        let mut link = ScriptedLink::new().with_supported(Err(ObdError::Timeout(1000)));
        let result = resolve(&CatalogSource::Discovered, &mut link).await;
        assert!(matches!(result, Err(PollError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_empty_discovery_falls_back_to_known_commands() {
        let mut link = ScriptedLink::new()
            .with_supported(Ok(Vec::new()))
            .with_known(vec![standard("SPEED"), standard("RPM")]);

        let catalog = resolve(&CatalogSource::Discovered, &mut link).await.unwrap();
        assert_eq!(catalog.keys().collect::<Vec<_>>(), vec!["RPM", "SPEED"]);
    }

    #[tokio::test]
    async fn test_empty_discovery_and_empty_fallback_is_fatal() {
        let mut link = ScriptedLink::new()
            .with_supported(Ok(Vec::new()))
            .with_known(Vec::new());

        let result = resolve(&CatalogSource::Discovered, &mut link).await;
        assert!(matches!(result, Err(PollError::Discovery(_))));
    }

    proptest! {
        #[test]
        fn prop_ordering_is_independent_of_input_order(
            seed in proptest::collection::vec(any::<u32>(), 0..26),
        ) {
            let mut commands: Vec<DiagnosticCommand> = obd_protocol::standard_commands();
            commands.push(manufacturer("OIL_LIFE", 0x1A2B));
            commands.push(manufacturer("BATTERY_SOH", 0x0101));
            let reference = Catalog::from_commands(commands.clone());

            // Shuffle deterministically from the generated seed
            let mut shuffled = commands;
            for (i, s) in seed.iter().enumerate() {
                let len = shuffled.len();
                shuffled.swap(i % len, (*s as usize) % len);
            }
            let catalog = Catalog::from_commands(shuffled);

            prop_assert_eq!(catalog.entries(), reference.entries());
            let first_manufacturer = catalog
                .entries()
                .iter()
                .position(|e| e.command().is_manufacturer())
                .unwrap_or(catalog.len());
            prop_assert!(catalog.entries()[first_manufacturer..]
                .iter()
                .all(|e| e.command().is_manufacturer()));
        }
    }
}
