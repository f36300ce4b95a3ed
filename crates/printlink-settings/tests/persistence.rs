use printlink_core::{keys, SettingsSource};
use printlink_settings::{FirmwareProtocol, PrinterSettings, SettingsError, SettingsStore};
use tempfile::TempDir;

#[test]
fn test_toml_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("printer.toml");

    let mut settings = PrinterSettings::default();
    settings.connection.port = "/dev/ttyUSB0".to_string();
    settings.connection.baud_rate = 115_200;
    settings.gcode.layer_to_pause = "3,7".to_string();
    settings
        .gcode
        .macros
        .insert("purge".to_string(), "G1 E10 F300".to_string());

    settings.save_to_file(&path).unwrap();
    let loaded = PrinterSettings::load_from_file(&path).unwrap();
    assert_eq!(loaded, settings);
}

#[test]
fn test_json_round_trip_into_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("printer.json");

    let mut settings = PrinterSettings::default();
    settings.connection.protocol = FirmwareProtocol::Binary;
    settings.print.feedrate_ratio = 0.5;
    settings.save_to_file(&path).unwrap();

    let store = SettingsStore::from_settings(&PrinterSettings::load_from_file(&path).unwrap());
    assert_eq!(store.get_string(keys::FIRMWARE_PROTOCOL), "binary");
    assert_eq!(store.get_f64_or(keys::FEED_RATE_RATIO, 1.0), 0.5);
    assert_eq!(store.get_string("macro.purge"), "");
}

#[test]
fn test_unsupported_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("printer.yaml");
    let err = PrinterSettings::default().save_to_file(&path).unwrap_err();
    assert!(matches!(err, SettingsError::UnsupportedFormat(ext) if ext == "yaml"));
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("printer.toml");
    std::fs::write(&path, "[machine]\nextruder_count = 0\n").unwrap();

    let err = PrinterSettings::load_from_file(&path).unwrap_err();
    assert!(matches!(err, SettingsError::InvalidSetting { key, .. } if key == keys::EXTRUDER_COUNT));
}

#[test]
fn test_missing_file_is_load_error() {
    let dir = TempDir::new().unwrap();
    let err = PrinterSettings::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, SettingsError::LoadError(_)));
}
