//! Module request validation

use std::path::Path;

use tracing::debug;

use fwupdater_core::{ModuleBitmap, ModuleId, Storage};

use crate::error::ValidationError;

/// Checks a module bitmap before anything is dispatched
///
/// Rules run in order and the first failure wins. The only side effect is a
/// storage existence probe.
pub struct RequestValidator<'a> {
    storage: &'a dyn Storage,
    sys_dir: &'a Path,
    wireless_file: &'a str,
}

impl<'a> RequestValidator<'a> {
    pub fn new(storage: &'a dyn Storage, sys_dir: &'a Path, wireless_file: &'a str) -> Self {
        Self {
            storage,
            sys_dir,
            wireless_file,
        }
    }

    pub fn validate(&self, request: ModuleBitmap) -> Result<(), ValidationError> {
        if request.contains(ModuleId::WirelessFirmware)
            && request.contains(ModuleId::WirelessFirmwareExternal)
        {
            return Err(ValidationError::InvalidCombination);
        }

        if request.contains(ModuleId::WirelessFirmware)
            && !self.storage.file_exists(self.sys_dir, self.wireless_file)
        {
            return Err(ValidationError::FileNotFound(self.wireless_file.to_string()));
        }

        debug!(modules = %request, "Module request accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStorage;

    const SYS: &str = "sys";
    const WIRELESS: &str = "WirelessServer.bin";

    fn storage_with_wireless_image() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.insert(SYS, WIRELESS, vec![0xE9; 16]);
        storage
    }

    #[test]
    fn test_both_wireless_modules_rejected_for_every_bitmap() {
        let storage = storage_with_wireless_image();
        let validator = RequestValidator::new(&storage, Path::new(SYS), WIRELESS);
        let both = ModuleId::WirelessFirmware.mask() | ModuleId::WirelessFirmwareExternal.mask();

        for bits in 0..=u8::MAX {
            let request = ModuleBitmap::from_bits(bits);
            let result = validator.validate(request);
            if bits & both == both {
                assert_eq!(result, Err(ValidationError::InvalidCombination), "{bits:#010b}");
            } else {
                assert_eq!(result, Ok(()), "{bits:#010b}");
            }
        }
    }

    #[test]
    fn test_combination_checked_before_file() {
        let storage = MemoryStorage::new();
        let validator = RequestValidator::new(&storage, Path::new(SYS), WIRELESS);
        let request = ModuleBitmap::from(ModuleId::WirelessFirmware)
            .with(ModuleId::WirelessFirmwareExternal);

        assert_eq!(
            validator.validate(request),
            Err(ValidationError::InvalidCombination)
        );
    }

    #[test]
    fn test_missing_wireless_image_names_file() {
        let storage = MemoryStorage::new();
        let validator = RequestValidator::new(&storage, Path::new(SYS), WIRELESS);

        for bits in 0..=u8::MAX {
            let request = ModuleBitmap::from_bits(bits);
            if !request.contains(ModuleId::WirelessFirmware)
                || request.contains(ModuleId::WirelessFirmwareExternal)
            {
                continue;
            }
            let err = validator.validate(request).unwrap_err();
            assert_eq!(err, ValidationError::FileNotFound(WIRELESS.to_string()));
            assert_eq!(err.to_string(), "File WirelessServer.bin not found");
        }
    }

    #[test]
    fn test_panel_and_external_need_no_wireless_image() {
        let storage = MemoryStorage::new();
        let validator = RequestValidator::new(&storage, Path::new(SYS), WIRELESS);
        let request =
            ModuleBitmap::from(ModuleId::PanelFirmware).with(ModuleId::WirelessFirmwareExternal);

        assert_eq!(validator.validate(request), Ok(()));
        assert_eq!(validator.validate(ModuleBitmap::EMPTY), Ok(()));
    }

    #[test]
    fn test_image_in_other_directory_not_accepted() {
        let storage = MemoryStorage::new();
        storage.insert("www", WIRELESS, vec![1]);
        let validator = RequestValidator::new(&storage, Path::new(SYS), WIRELESS);

        assert!(validator
            .validate(ModuleId::WirelessFirmware.into())
            .is_err());
    }
}
