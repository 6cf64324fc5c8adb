// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use ini::Ini;
use log::{debug, info, warn};
use ruzu_common::settings::{parse_bool, parse_u64, MemorySettings};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "ruzu-trace.ini";

/// Locate the ruzu-trace config file.
pub fn find_config_path() -> Option<PathBuf> {
    // XDG_CONFIG_HOME
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(&xdg).join("ruzu").join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some(path);
        }
    }

    // Linux: ~/.config/ruzu/ruzu-trace.ini
    if let Ok(home) = std::env::var("HOME") {
        let path = PathBuf::from(&home)
            .join(".config")
            .join("ruzu")
            .join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Load memory settings from an INI file, falling back to defaults for
/// anything missing or malformed.
pub fn load_config(path: Option<&Path>) -> MemorySettings {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                warn!("Config file not found: {}", p.display());
                return MemorySettings::default();
            }
            p.to_path_buf()
        }
        None => match find_config_path() {
            Some(p) => p,
            None => {
                info!("No config found, using defaults");
                return MemorySettings::default();
            }
        },
    };

    info!("Loading config from: {}", config_path.display());

    match Ini::load_from_file(&config_path) {
        Ok(conf) => settings_from_ini(&conf),
        Err(e) => {
            warn!("Failed to parse config: {}", e);
            MemorySettings::default()
        }
    }
}

pub fn settings_from_ini(conf: &Ini) -> MemorySettings {
    let mut settings = MemorySettings::default();

    // [Memory]
    if let Some(section) = conf.section(Some("Memory")) {
        let fields: [(&str, &mut u64); 4] = [
            ("gpu_va_limit", &mut settings.gpu_va_limit),
            ("alloc_base", &mut settings.alloc_base),
            ("sparse_pool_size", &mut settings.sparse_pool_size),
            ("host_memory_size", &mut settings.host_memory_size),
        ];
        for (key, field) in fields {
            let Some(raw) = section.get(key) else {
                continue;
            };
            match parse_u64(raw) {
                Some(value) => {
                    *field = value;
                    debug!("{}: 0x{:X}", key, value);
                }
                None => warn!("Ignoring invalid {} value: {:?}", key, raw),
            }
        }
    }

    // [Debug]
    if let Some(section) = conf.section(Some("Debug")) {
        if let Some(debug_log) = section.get("use_debug_logging") {
            settings.use_debug_logging = parse_bool(debug_log).unwrap_or(false);
        }
    }

    settings
}
