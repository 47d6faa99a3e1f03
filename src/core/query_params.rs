use std::collections::HashMap;

/// Parse query parameters from a URI string.
///
/// Values are URL-decoded; for repeated keys only the last one is kept.
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    if let Some(query_start) = uri.find('?') {
        let query = &uri[query_start + 1..];
        for param in query.split('&').filter(|p| !p.is_empty()) {
            if let Some(eq_idx) = param.find('=') {
                let key = &param[..eq_idx];
                let encoded_value = &param[eq_idx + 1..];
                let decoded = urlencoding::decode(encoded_value)
                    .unwrap_or(std::borrow::Cow::Borrowed(encoded_value))
                    .to_string();
                params.insert(key.to_string(), decoded);
            } else {
                // Flag parameter without value
                params.insert(param.to_string(), String::new());
            }
        }
    }

    params
}

/// Page number from `?page=`; absent or unparsable means 1, values below 1 clamp to 1.
pub fn get_page(params: &HashMap<String, String>) -> i64 {
    params
        .get("page")
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(1)
        .max(1)
}

/// Floating point parameter such as `?since=`.
pub fn get_f64(params: &HashMap<String, String>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_decodes() {
        let params = parse_query_params("/explore?page=2&user=al%20ice&flag");
        assert_eq!(params.get("page").map(String::as_str), Some("2"));
        assert_eq!(params.get("user").map(String::as_str), Some("al ice"));
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
        assert!(parse_query_params("/explore").is_empty());
    }

    #[test]
    fn page_defaults_and_clamps() {
        assert_eq!(get_page(&parse_query_params("/index")), 1);
        assert_eq!(get_page(&parse_query_params("/index?page=0")), 1);
        assert_eq!(get_page(&parse_query_params("/index?page=-5")), 1);
        assert_eq!(get_page(&parse_query_params("/index?page=abc")), 1);
        assert_eq!(get_page(&parse_query_params("/index?page=3")), 3);
    }

    #[test]
    fn since_parses_floats() {
        let params = parse_query_params("/notifications?since=1700000000.5");
        assert_eq!(get_f64(&params, "since", 0.0), 1700000000.5);
        assert_eq!(get_f64(&params, "missing", 0.0), 0.0);
        assert_eq!(get_f64(&parse_query_params("/n?since=NaN"), "since", 0.0), 0.0);
    }
}
