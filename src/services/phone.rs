// services/phone.rs

/// Rewrite a caller-supplied phone number into the 254XXXXXXXXX form
/// Daraja expects. Rules are applied in priority order; anything that
/// matches none of them is forwarded unchanged and left to Daraja's own
/// validation.
pub fn format_phone_number(phone: &str) -> String {
    let phone = phone.trim();

    if let Some(rest) = phone.strip_prefix("07") {
        return format!("2547{}", rest);
    }
    if let Some(rest) = phone.strip_prefix("+254") {
        return format!("254{}", rest);
    }
    if phone.starts_with("254") {
        return phone.to_string();
    }
    if phone.starts_with('7') {
        return format!("254{}", phone);
    }
    if let Some(rest) = phone.strip_prefix('0') {
        return format!("254{}", rest);
    }

    phone.to_string()
}
