//! Bus name, object path and member syntax.

/// Longest interface, member, error or bus name accepted on the wire.
pub const MAX_NAME: usize = 255;

/// Well-known name of the bus driver.
pub const BUS_DRIVER: &str = "org.freedesktop.DBus";

/// Object path of the bus driver.
pub const BUS_DRIVER_PATH: &str = "/org/freedesktop/DBus";

/// Interface implementing the generic property Get/Set convention.
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// First byte of a name element.
const fn is_element_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

/// Any later byte of a name element.
const fn is_element_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Checks dot-separated elements, at least two, none empty.
fn dotted(s: &str, allow_digit_start: bool, allow_dash: bool) -> bool {
    if s.is_empty() || s.len() > MAX_NAME {
        return false;
    }
    let mut count = 0;
    for element in s.split('.') {
        let Some(&first) = element.as_bytes().first() else {
            return false;
        };
        let dash = |c: u8| allow_dash && c == b'-';
        let digit = allow_digit_start && first.is_ascii_digit();
        if !(is_element_start(first) || dash(first) || digit) {
            return false;
        }
        if !element.bytes().all(|c| is_element_char(c) || dash(c)) {
            return false;
        }
        count += 1;
    }
    count >= 2
}

/// Returns `true` for a valid interface name such as `org.example.Iface`.
pub fn interface_name_is_valid(name: &str) -> bool {
    dotted(name, false, false)
}

/// Error names follow the interface name grammar.
pub fn error_name_is_valid(name: &str) -> bool {
    interface_name_is_valid(name)
}

/// Returns `true` for a valid member (method, signal or property) name.
pub fn member_name_is_valid(name: &str) -> bool {
    let bytes = name.as_bytes();
    match bytes.first() {
        Some(&c) if is_element_start(c) => {
            name.len() <= MAX_NAME && bytes.iter().all(|&c| is_element_char(c))
        }
        _ => false,
    }
}

/// Returns `true` for a unique (`:1.42`) or well-known bus name.
pub fn service_name_is_valid(name: &str) -> bool {
    match name.strip_prefix(':') {
        Some(rest) => dotted(rest, true, true),
        None => dotted(name, false, true),
    }
}

/// Returns `true` for a valid object path such as `/org/example/Obj`.
pub fn object_path_is_valid(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    rest.split('/')
        .all(|e| !e.is_empty() && e.bytes().all(is_element_char))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interfaces() {
        assert!(interface_name_is_valid("org.example.IFace"));
        assert!(interface_name_is_valid(PROPERTIES_INTERFACE));
        assert!(!interface_name_is_valid("org"));
        assert!(!interface_name_is_valid("org..example"));
        assert!(!interface_name_is_valid("org.1example"));
        assert!(!interface_name_is_valid("org.exa-mple"));
        assert!(!interface_name_is_valid(""));
    }

    #[test]
    fn members() {
        assert!(member_name_is_valid("Get"));
        assert!(member_name_is_valid("_private2"));
        assert!(!member_name_is_valid("2Get"));
        assert!(!member_name_is_valid("Get.All"));
        assert!(!member_name_is_valid(""));
    }

    #[test]
    fn services() {
        assert!(service_name_is_valid("com.example.Foo"));
        assert!(service_name_is_valid(":1.42"));
        assert!(service_name_is_valid("org.some-thing.Name"));
        assert!(!service_name_is_valid("1.42"));
        assert!(!service_name_is_valid(":"));
    }

    #[test]
    fn paths() {
        assert!(object_path_is_valid("/"));
        assert!(object_path_is_valid("/org/example/Obj_1"));
        assert!(!object_path_is_valid(""));
        assert!(!object_path_is_valid("org/example"));
        assert!(!object_path_is_valid("/org/"));
        assert!(!object_path_is_valid("/org//example"));
    }
}
