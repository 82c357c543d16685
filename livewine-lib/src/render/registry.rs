//! REGEDIT4 import files

use std::fmt;

/// A registry value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    String(String),
    Dword(u32),
}

impl fmt::Display for RegValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegValue::String(s) => write!(f, "\"{}\"", escape(s)),
            RegValue::Dword(d) => write!(f, "dword:{:08x}", d),
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// `.reg` file with keys in insertion order
#[derive(Debug, Clone, Default)]
pub struct RegFile {
    keys: Vec<(String, Vec<(String, RegValue)>)>,
}

impl RegFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new key section
    pub fn key(mut self, path: impl Into<String>) -> Self {
        self.keys.push((path.into(), Vec::new()));
        self
    }

    /// Add a value to the most recent key
    pub fn value(mut self, name: impl Into<String>, value: RegValue) -> Self {
        if let Some((_, values)) = self.keys.last_mut() {
            values.push((name.into(), value));
        }
        self
    }

    pub fn dword(self, name: impl Into<String>, value: u32) -> Self {
        self.value(name, RegValue::Dword(value))
    }

    pub fn string(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.value(name, RegValue::String(value.into()))
    }
}

impl fmt::Display for RegFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "REGEDIT4")?;
        for (key, values) in &self.keys {
            writeln!(f)?;
            writeln!(f, "[{}]", key)?;
            for (name, value) in values {
                writeln!(f, "\"{}\"={}", escape(name), value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_wineasio_settings() {
        let reg = RegFile::new()
            .key(r"HKEY_CURRENT_USER\Software\Wine\WineASIO")
            .dword("Preferred buffersize", 256)
            .dword("Fixed buffersize", 1)
            .string("Client name", "Ableton \"Live\"");

        assert_eq!(
            reg.to_string(),
            "REGEDIT4\n\n[HKEY_CURRENT_USER\\Software\\Wine\\WineASIO]\n\
             \"Preferred buffersize\"=dword:00000100\n\
             \"Fixed buffersize\"=dword:00000001\n\
             \"Client name\"=\"Ableton \\\"Live\\\"\"\n"
        );
    }

    #[test]
    fn values_without_a_key_are_dropped() {
        let reg = RegFile::new().dword("orphan", 1);
        assert_eq!(reg.to_string(), "REGEDIT4\n");
    }
}
