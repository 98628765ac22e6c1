use crate::error::{ExporterError, Result};
use crate::types::{Server, UserInfo};
use regex::Regex;
use std::collections::HashMap;

/// Parse the `<client .../>` element of speedtest-config.php
///
/// Example:
/// `<client ip="1.2.3.4" lat="40.7128" lon="-74.0060" isp="TestISP" isprating="3.7" .../>`
pub fn parse_user_info(xml: &str) -> Result<UserInfo> {
    let element = Regex::new(r"<client\s+([^>]*?)/?>")?;
    let attribute = Regex::new(r#"([\w-]+)="([^"]*)""#)?;

    let caps = element
        .captures(xml)
        .ok_or_else(|| ExporterError::Custom("no <client> element in config".to_string()))?;

    let attrs: HashMap<&str, &str> = attribute
        .captures_iter(&caps[1])
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
        .collect();

    let ip = attrs.get("ip").copied().unwrap_or_default();
    if ip.is_empty() {
        return Err(ExporterError::Custom("client element has no ip".to_string()));
    }

    Ok(UserInfo {
        ip: ip.to_string(),
        lat: attrs.get("lat").copied().unwrap_or_default().to_string(),
        lon: attrs.get("lon").copied().unwrap_or_default().to_string(),
        isp: attrs.get("isp").copied().unwrap_or_default().to_string(),
    })
}

/// Parse the JSON server list, nearest first.
pub fn parse_servers(json: &str) -> Result<Vec<Server>> {
    let mut servers: Vec<Server> = serde_json::from_str(json)?;
    // stable: servers at the same distance keep the order the API gave them
    servers.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<settings>
<client ip="1.2.3.4" lat="40.7128" lon="-74.0060" isp="TestISP" isprating="3.7" rating="0" ispdlavg="0" ispulavg="0" loggedin="0" country="US" />
<server-config threadcount="4" />
</settings>"#;

    #[test]
    fn test_parse_user_info() -> Result<()> {
        let user = parse_user_info(CONFIG)?;
        assert_eq!(
            user,
            UserInfo {
                ip: "1.2.3.4".to_string(),
                lat: "40.7128".to_string(),
                lon: "-74.0060".to_string(),
                isp: "TestISP".to_string(),
            }
        );
        Ok(())
    }

    #[test]
    fn test_parse_user_info_without_client() {
        assert!(parse_user_info("<settings></settings>").is_err());
        assert!(parse_user_info(r#"<client lat="1" />"#).is_err());
    }

    #[test]
    fn test_parse_servers_sorted_by_distance() -> Result<()> {
        let json = r#"[
            {"url":"http://far.example:8080/speedtest/upload.php","lat":"34.0522","lon":"-118.2437",
             "distance":3935,"name":"Los Angeles, CA","country":"United States","cc":"US",
             "sponsor":"Far ISP","id":"200","preferred":0,"host":"far.example:8080"},
            {"url":"http://near.example:8080/speedtest/upload.php","lat":"40.7128","lon":"-74.0060",
             "distance":5.4,"name":"New York, NY","country":"United States","cc":"US",
             "sponsor":"Near ISP","id":"100","preferred":0,"host":"near.example:8080"}
        ]"#;

        let servers = parse_servers(json)?;
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].id, "100");
        assert_eq!(servers[0].distance, 5.4);
        assert_eq!(servers[0].base_url(), "http://near.example:8080/speedtest");
        assert_eq!(servers[0].host, "near.example:8080");
        assert_eq!(servers[1].sponsor, "Far ISP");
        Ok(())
    }
}
