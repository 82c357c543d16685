//! PipeWire and WirePlumber drop-in configuration

use std::fmt;

/// `context.properties` clock settings for `pipewire.conf.d`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSettings {
    pub rate: u32,
    pub quantum: u32,
}

impl ClockSettings {
    pub fn new(rate: u32, quantum: u32) -> Self {
        Self { rate, quantum }
    }

    fn max_quantum(&self) -> u32 {
        (self.quantum * 4).max(1024)
    }
}

impl fmt::Display for ClockSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Written by livewine")?;
        writeln!(f, "context.properties = {{")?;
        writeln!(f, "    default.clock.rate          = {}", self.rate)?;
        writeln!(f, "    default.clock.allowed-rates = [ {} ]", self.rate)?;
        writeln!(f, "    default.clock.quantum       = {}", self.quantum)?;
        writeln!(f, "    default.clock.min-quantum   = {}", self.quantum)?;
        writeln!(f, "    default.clock.max-quantum   = {}", self.max_quantum())?;
        writeln!(f, "}}")?;
        Ok(())
    }
}

/// WirePlumber rule pinning an ALSA card to the session rate and period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRule {
    pub interface: String,
    pub rate: u32,
    pub period: u32,
}

impl fmt::Display for InterfaceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let needle = self.interface.replace('"', "");
        writeln!(f, "# Written by livewine")?;
        writeln!(f, "monitor.alsa.rules = [")?;
        writeln!(f, "  {{")?;
        writeln!(f, "    matches = [")?;
        writeln!(f, "      {{ node.name = \"~alsa_*{}*\" }}", needle)?;
        writeln!(f, "    ]")?;
        writeln!(f, "    actions = {{")?;
        writeln!(f, "      update-props = {{")?;
        writeln!(f, "        audio.rate = {}", self.rate)?;
        writeln!(f, "        api.alsa.period-size = {}", self.period)?;
        writeln!(f, "        session.suspend-timeout-seconds = 0")?;
        writeln!(f, "      }}")?;
        writeln!(f, "    }}")?;
        writeln!(f, "  }}")?;
        writeln!(f, "]")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_settings_follow_rate_and_buffer() {
        let text = ClockSettings::new(48000, 256).to_string();
        assert!(text.contains("default.clock.rate          = 48000\n"));
        assert!(text.contains("default.clock.quantum       = 256\n"));
        assert!(text.contains("default.clock.min-quantum   = 256\n"));
        assert!(text.contains("default.clock.max-quantum   = 1024\n"));
        assert_eq!(text, ClockSettings::new(48000, 256).to_string());

        let large = ClockSettings::new(96000, 2048).to_string();
        assert!(large.contains("default.clock.max-quantum   = 8192\n"));
    }

    #[test]
    fn interface_rule_matches_card_name() {
        let rule = InterfaceRule {
            interface: "Scarlett_2i2".into(),
            rate: 48000,
            period: 128,
        };
        let text = rule.to_string();
        assert!(text.contains("node.name = \"~alsa_*Scarlett_2i2*\""));
        assert!(text.contains("api.alsa.period-size = 128"));
    }
}
