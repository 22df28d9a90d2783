//! Update modules and the request bitmap

use serde::{Deserialize, Serialize};

/// One independently updatable firmware target.
///
/// The discriminant is the bit position of the module in a [`ModuleBitmap`].
/// Bit 2 belonged to a module that has since been retired and is never
/// assigned again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleId {
    /// Push the configured firmware image to the wireless co-processor
    WirelessFirmware,
    /// Put the wireless co-processor into its bootloader for an external upload
    WirelessFirmwareExternal,
    /// Flash the panel sub-board over the auxiliary serial link
    PanelFirmware,
}

impl ModuleId {
    /// All modules in ascending bit order
    pub const ALL: [ModuleId; 3] = [
        ModuleId::WirelessFirmware,
        ModuleId::WirelessFirmwareExternal,
        ModuleId::PanelFirmware,
    ];

    /// Bit position of this module in a request bitmap
    pub const fn bit(self) -> u8 {
        match self {
            ModuleId::WirelessFirmware => 1,
            ModuleId::WirelessFirmwareExternal => 3,
            ModuleId::PanelFirmware => 4,
        }
    }

    /// Single-bit mask for this module
    pub const fn mask(self) -> u8 {
        1 << self.bit()
    }

    /// Look up a module by its bit position
    pub fn from_bit(bit: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.bit() == bit)
    }

    /// Stable snake_case name
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleId::WirelessFirmware => "wireless_firmware",
            ModuleId::WirelessFirmwareExternal => "wireless_firmware_external",
            ModuleId::PanelFirmware => "panel_firmware",
        }
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModuleId {
    type Err = String;

    /// Accepts either the snake_case name or the bit number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(bit) = s.parse::<u8>() {
            return Self::from_bit(bit).ok_or_else(|| format!("Unknown module number: {}", bit));
        }
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("Unknown module: '{}'", s))
    }
}

/// Set of requested update modules, one bit per [`ModuleId`].
///
/// Bits that do not correspond to a known module are carried along but never
/// yielded by [`ModuleBitmap::modules`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleBitmap(u8);

impl ModuleBitmap {
    pub const EMPTY: ModuleBitmap = ModuleBitmap(0);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, module: ModuleId) -> bool {
        self.0 & module.mask() != 0
    }

    pub fn insert(&mut self, module: ModuleId) {
        self.0 |= module.mask();
    }

    #[must_use]
    pub fn with(mut self, module: ModuleId) -> Self {
        self.insert(module);
        self
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Bits set in the map that name no known module
    pub fn unknown_bits(self) -> u8 {
        let known = ModuleId::ALL.iter().fold(0u8, |acc, m| acc | m.mask());
        self.0 & !known
    }

    /// Known modules in the map, in ascending bit order
    pub fn modules(self) -> impl Iterator<Item = ModuleId> {
        ModuleId::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

impl From<ModuleId> for ModuleBitmap {
    fn from(module: ModuleId) -> Self {
        Self(module.mask())
    }
}

impl FromIterator<ModuleId> for ModuleBitmap {
    fn from_iter<I: IntoIterator<Item = ModuleId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl std::fmt::Display for ModuleBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.modules().map(ModuleId::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_positions() {
        assert_eq!(ModuleId::WirelessFirmware.mask(), 0b0000_0010);
        assert_eq!(ModuleId::WirelessFirmwareExternal.mask(), 0b0000_1000);
        assert_eq!(ModuleId::PanelFirmware.mask(), 0b0001_0000);
        assert_eq!(ModuleId::from_bit(2), None);
    }

    #[test]
    fn test_modules_skip_unknown_bits() {
        // bit 2 is the retired module, bit 7 was never assigned
        let map = ModuleBitmap::from_bits(0b1001_0100);
        assert_eq!(map.modules().collect::<Vec<_>>(), vec![ModuleId::PanelFirmware]);
        assert_eq!(map.unknown_bits(), 0b1000_0100);
    }

    #[test]
    fn test_collect_and_display() {
        let map: ModuleBitmap = [ModuleId::PanelFirmware, ModuleId::WirelessFirmware]
            .into_iter()
            .collect();
        assert!(map.contains(ModuleId::WirelessFirmware));
        assert!(!map.contains(ModuleId::WirelessFirmwareExternal));
        assert_eq!(map.to_string(), "[wireless_firmware, panel_firmware]");
    }

    #[test]
    fn test_parse_module() {
        assert_eq!("panel_firmware".parse::<ModuleId>(), Ok(ModuleId::PanelFirmware));
        assert_eq!("3".parse::<ModuleId>(), Ok(ModuleId::WirelessFirmwareExternal));
        assert!("2".parse::<ModuleId>().is_err());
        assert!("dwc".parse::<ModuleId>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ModuleId::WirelessFirmwareExternal).unwrap();
        assert_eq!(json, "\"wireless_firmware_external\"");
        let map: ModuleBitmap = serde_json::from_str("18").unwrap();
        assert_eq!(map.bits(), 18);
    }
}
