//! Device boundary
//!
//! The core delegates all I/O to devices. A device is anything that can
//! honor byte reads and writes plus a string-keyed parameter interface; the
//! `open`/`close`/`read`/`write`/`get-param`/`set-param` primitives call
//! through this trait and never touch the OS directly. Hosts can register
//! their own device kinds (a canvas, a serial port) without changing the
//! runtime; the built-in kinds are `console` and `file`.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};

pub trait Device {
    fn read(&mut self, len: usize) -> Result<Vec<u8>, String>;
    fn write(&mut self, bytes: &[u8]) -> Result<usize, String>;
    fn get_param(&mut self, key: &str) -> Result<Option<String>, String>;
    fn set_param(&mut self, key: &str, value: &str) -> Result<(), String>;
}

pub type DeviceFactory = Box<dyn Fn(&str) -> Result<Box<dyn Device>, String>>;

/// Open-device table. Handles are dense indices wrapped into
/// `(*device* . id)` pairs by the `open` primitive. Closed slots stay
/// retired, so a stale handle can never reach a different device.
#[derive(Default)]
pub struct DeviceManager {
    kinds: HashMap<String, DeviceFactory>,
    open: Vec<Option<Box<dyn Device>>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        let mut manager = DeviceManager::default();
        manager.register("console", Box::new(|_| Ok(Box::new(ConsoleDevice) as Box<dyn Device>)));
        manager.register(
            "file",
            Box::new(|path| {
                let file = std::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(path)
                    .map_err(|e| format!("cannot open {path}: {e}"))?;
                Ok(Box::new(FileDevice { file }) as Box<dyn Device>)
            }),
        );
        manager
    }

    /// Make a new device kind available to `open`.
    pub fn register(&mut self, kind: &str, factory: DeviceFactory) {
        self.kinds.insert(kind.to_string(), factory);
    }

    pub fn open(&mut self, kind: &str, arg: &str) -> Result<u32, String> {
        let factory = self
            .kinds
            .get(kind)
            .ok_or_else(|| format!("unknown device kind \"{kind}\""))?;
        let device = factory(arg)?;
        let id = self.open.len() as u32;
        self.open.push(Some(device));
        Ok(id)
    }

    pub fn get(&mut self, id: u32) -> Option<&mut (dyn Device + '_)> {
        match self.open.get_mut(id as usize) {
            Some(Some(device)) => Some(device.as_mut() as &mut dyn Device),
            _ => None,
        }
    }

    pub fn close(&mut self, id: u32) -> Result<(), String> {
        match self.open.get_mut(id as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(format!("device {id} is not open")),
        }
    }
}

struct ConsoleDevice;

impl Device for ConsoleDevice {
    fn read(&mut self, len: usize) -> Result<Vec<u8>, String> {
        let mut buf = vec![0u8; len];
        let n = std::io::stdin()
            .read(&mut buf)
            .map_err(|e| e.to_string())?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, String> {
        let mut out = std::io::stdout();
        out.write_all(bytes).map_err(|e| e.to_string())?;
        out.flush().map_err(|e| e.to_string())?;
        Ok(bytes.len())
    }

    fn get_param(&mut self, _key: &str) -> Result<Option<String>, String> {
        Ok(None)
    }

    fn set_param(&mut self, _key: &str, _value: &str) -> Result<(), String> {
        Ok(())
    }
}

struct FileDevice {
    file: std::fs::File,
}

impl Device for FileDevice {
    fn read(&mut self, len: usize) -> Result<Vec<u8>, String> {
        let mut buf = vec![0u8; len];
        let n = self.file.read(&mut buf).map_err(|e| e.to_string())?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, String> {
        self.file.write(bytes).map_err(|e| e.to_string())
    }

    fn get_param(&mut self, key: &str) -> Result<Option<String>, String> {
        match key {
            "size" => {
                let len = self.file.metadata().map_err(|e| e.to_string())?.len();
                Ok(Some(len.to_string()))
            }
            "position" => {
                let pos = self
                    .file
                    .stream_position()
                    .map_err(|e| e.to_string())?;
                Ok(Some(pos.to_string()))
            }
            _ => Ok(None),
        }
    }

    fn set_param(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "position" => {
                let pos: u64 = value
                    .parse()
                    .map_err(|_| format!("bad position \"{value}\""))?;
                self.file
                    .seek(SeekFrom::Start(pos))
                    .map_err(|e| e.to_string())?;
                Ok(())
            }
            _ => Err(format!("unknown parameter \"{key}\"")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kind_fails() {
        let mut manager = DeviceManager::new();
        assert!(manager.open("teleporter", "").is_err());
    }

    #[test]
    fn test_file_device_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut manager = DeviceManager::new();
        let id = manager.open("file", path.to_str().unwrap()).unwrap();
        {
            let dev = manager.get(id).unwrap();
            assert_eq!(dev.write(b"cassette").unwrap(), 8);
            dev.set_param("position", "0").unwrap();
            assert_eq!(dev.read(8).unwrap(), b"cassette");
            assert_eq!(dev.get_param("size").unwrap(), Some("8".to_string()));
        }
        manager.close(id).unwrap();
        assert!(manager.close(id).is_err());
        assert!(manager.get(id).is_none());
    }

    #[test]
    fn test_custom_device_registration() {
        struct NullDevice;
        impl Device for NullDevice {
            fn read(&mut self, _len: usize) -> Result<Vec<u8>, String> {
                Ok(Vec::new())
            }
            fn write(&mut self, bytes: &[u8]) -> Result<usize, String> {
                Ok(bytes.len())
            }
            fn get_param(&mut self, _key: &str) -> Result<Option<String>, String> {
                Ok(None)
            }
            fn set_param(&mut self, _key: &str, _value: &str) -> Result<(), String> {
                Ok(())
            }
        }
        let mut manager = DeviceManager::new();
        manager.register("null", Box::new(|_| Ok(Box::new(NullDevice) as Box<dyn Device>)));
        let id = manager.open("null", "").unwrap();
        assert_eq!(manager.get(id).unwrap().write(b"xy").unwrap(), 2);
    }
}
