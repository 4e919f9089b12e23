//! Registry of the known game clients.

use std::collections::BTreeMap;
use std::sync::LazyLock;

/// One regional client of the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientDescriptor {
    /// Identifier used on the command line, e.g. `EN`.
    pub id: &'static str,
    /// Whether the client is still served.
    pub active: bool,
    /// Locale code; names the client's asset directory.
    pub locale: &'static str,
    /// Android package name.
    pub package_name: &'static str,
}

const CLIENTS: [ClientDescriptor; 5] = [
    ClientDescriptor {
        id: "EN",
        active: true,
        locale: "en-US",
        package_name: "com.superprism.illusion",
    },
    ClientDescriptor {
        id: "KR",
        active: true,
        locale: "ko-KR",
        package_name: "com.cyou.illusionc.gp",
    },
    ClientDescriptor {
        id: "TW_OLD",
        active: false,
        locale: "zh-TW",
        package_name: "com.mamba.dreamlandrecon",
    },
    ClientDescriptor {
        id: "JP",
        active: true,
        locale: "ja-JP",
        package_name: "com.efun.mjlj",
    },
    ClientDescriptor {
        id: "TW",
        active: true,
        locale: "zh-TW",
        package_name: "com.mover.twmjljr",
    },
];

static REGISTRY: LazyLock<ClientRegistry> = LazyLock::new(|| ClientRegistry::new(&CLIENTS));

/// Immutable lookup of clients by identifier and by package name.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: Vec<ClientDescriptor>,
    by_id: BTreeMap<&'static str, usize>,
    by_package: BTreeMap<&'static str, usize>,
}

impl ClientRegistry {
    pub fn new(clients: &[ClientDescriptor]) -> Self {
        let clients = clients.to_vec();
        let by_id = clients.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
        let by_package = clients
            .iter()
            .enumerate()
            .map(|(i, c)| (c.package_name, i))
            .collect();
        Self {
            clients,
            by_id,
            by_package,
        }
    }

    /// Registry of the built-in clients.
    pub fn global() -> &'static ClientRegistry {
        &REGISTRY
    }

    pub fn get(&self, id: &str) -> Option<&ClientDescriptor> {
        self.by_id.get(id).map(|&i| &self.clients[i])
    }

    pub fn by_package_name(&self, package_name: &str) -> Option<&ClientDescriptor> {
        self.by_package.get(package_name).map(|&i| &self.clients[i])
    }

    /// Clients in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ClientDescriptor> {
        self.clients.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_id_and_package() {
        let registry = ClientRegistry::global();
        let jp = registry.get("JP").unwrap();
        assert_eq!(jp.locale, "ja-JP");
        assert_eq!(registry.by_package_name("com.efun.mjlj"), Some(jp));
        assert!(registry.get("jp").is_none());
        assert!(registry.by_package_name("com.example").is_none());
    }

    #[test]
    fn test_inactive_client_is_listed() {
        let registry = ClientRegistry::global();
        let old = registry.get("TW_OLD").unwrap();
        assert!(!old.active);
        assert_eq!(registry.iter().filter(|c| c.locale == "zh-TW").count(), 2);
        assert_eq!(registry.iter().count(), 5);
    }
}
