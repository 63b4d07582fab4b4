#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Logic,
    Gateway,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub link_targets: Vec<String>,
    pub name_prefix: String,
    pub access_tokens: Vec<(i64, String)>,
    pub user_groups: Vec<(i64, Vec<i64>)>,
}

pub struct Config {
    pub port: u16,
    pub mode: Mode,
    pub gateway: Option<GatewayConfig>,
    pub link_buffer: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let mode = match std::env::var("CHATLINK_MODE")
            .unwrap_or_else(|_| "logic".to_string())
            .to_lowercase()
            .as_str()
        {
            "gateway" => Mode::Gateway,
            _ => Mode::Logic,
        };

        let gateway = if mode == Mode::Gateway {
            let link_targets = parse_link_targets(
                &std::env::var("CHATLINK_LINK_TARGETS")
                    .expect("CHATLINK_LINK_TARGETS is required in gateway mode"),
            );
            assert!(
                !link_targets.is_empty(),
                "CHATLINK_LINK_TARGETS must name at least one logic node"
            );
            let name_prefix = std::env::var("CHATLINK_NAME_PREFIX")
                .ok()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "chatlink-gw".to_string());
            let access_tokens = std::env::var("CHATLINK_ACCESS_TOKENS")
                .map(|v| parse_access_tokens(&v))
                .unwrap_or_default();
            let user_groups = std::env::var("CHATLINK_USER_GROUPS")
                .map(|v| parse_user_groups(&v))
                .unwrap_or_default();

            Some(GatewayConfig {
                link_targets,
                name_prefix,
                access_tokens,
                user_groups,
            })
        } else {
            None
        };

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(39099),
            mode,
            gateway,
            link_buffer: std::env::var("CHATLINK_LINK_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(1024),
        }
    }
}

/// Comma-separated base URLs, trimmed and de-duplicated in order.
fn parse_link_targets(raw: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for target in raw.split(',').map(|t| t.trim().trim_end_matches('/')) {
        if !target.is_empty() && !targets.iter().any(|t| t == target) {
            targets.push(target.to_string());
        }
    }
    targets
}

fn parse_access_tokens(raw: &str) -> Vec<(i64, String)> {
    raw.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            let (uid, token) = pair
                .split_once(':')
                .expect("CHATLINK_ACCESS_TOKENS entries must be uid:token");
            let uid = uid
                .trim()
                .parse()
                .expect("CHATLINK_ACCESS_TOKENS uid must be a valid integer");
            (uid, token.trim().to_string())
        })
        .collect()
}

// uid:gid|gid,uid:gid
fn parse_user_groups(raw: &str) -> Vec<(i64, Vec<i64>)> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let (uid, gids) = entry
                .split_once(':')
                .expect("CHATLINK_USER_GROUPS entries must be uid:gid|gid");
            let uid = uid
                .trim()
                .parse()
                .expect("CHATLINK_USER_GROUPS uid must be a valid integer");
            let gids = gids
                .split('|')
                .filter(|g| !g.trim().is_empty())
                .map(|g| {
                    g.trim()
                        .parse()
                        .expect("CHATLINK_USER_GROUPS gid must be a valid integer")
                })
                .collect();
            (uid, gids)
        })
        .collect()
}
