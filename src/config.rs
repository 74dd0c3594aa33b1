use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub admin_user: String,
    pub admin_password: String,
    pub session_ttl_hours: i64,
    pub booking_window_days: i64,
    pub cookie_secure: bool,
    pub shop: ShopInfo,
}

/// Details quoted in the client confirmation message.
#[derive(Clone, Debug)]
pub struct ShopInfo {
    pub whatsapp_country_code: String,
    pub address: String,
    pub contact: String,
}

impl Config {
    pub fn from_env() -> Self {
        let admin_user = env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
        let admin_password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
        if admin_password == "admin" {
            log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
        }

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./data/barbearia.db".to_string()),
            port: parsed("PORT", 8080),
            admin_user,
            admin_password,
            session_ttl_hours: parsed("SESSION_TTL_HOURS", 24),
            booking_window_days: parsed("BOOKING_WINDOW_DAYS", 30),
            cookie_secure: parsed("COOKIE_SECURE", false),
            shop: ShopInfo {
                whatsapp_country_code: env::var("WHATSAPP_COUNTRY_CODE")
                    .unwrap_or_else(|_| "55".to_string()),
                address: env::var("SHOP_ADDRESS")
                    .unwrap_or_else(|_| "[Endereço da Barbearia]".to_string()),
                contact: env::var("SHOP_CONTACT")
                    .unwrap_or_else(|_| "[Telefone da Barbearia]".to_string()),
            },
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                log::warn!("Ignoring invalid value for {key}: {value:?}");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            port: 0,
            admin_user: "barbeiro".to_string(),
            admin_password: "segredo-forte".to_string(),
            session_ttl_hours: 24,
            booking_window_days: 30,
            cookie_secure: false,
            shop: ShopInfo {
                whatsapp_country_code: "55".to_string(),
                address: "Rua das Tesouras, 10".to_string(),
                contact: "(11) 3333-4444".to_string(),
            },
        }
    }
}
