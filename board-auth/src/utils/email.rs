/// Masks an address for display: `user@test.com` becomes `u***@t***.com`.
/// Anything that is not a plain `local@name.tld` address is returned as is.
pub fn obfuscate_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return email.to_string();
    };
    if local.is_empty() || domain.contains('@') {
        return email.to_string();
    }

    let Some((name, tld)) = domain.split_once('.') else {
        return email.to_string();
    };
    if name.is_empty() || tld.contains('.') {
        return email.to_string();
    }

    let (Some(l), Some(d)) = (local.chars().next(), name.chars().next()) else {
        return email.to_string();
    };
    format!("{}***@{}***.{}", l, d, tld)
}
