//! Expands a service's templated command/args now that a port is known.

/// Expands `{Port}` (and, for symmetry with tunnel templates, `{Name}`)
/// in a service's command/args once the Port Pool has allocated a port.
#[must_use]
pub fn expand(template: &str, name: &str, port: u16) -> String {
    template
        .replace("{Port}", &port.to_string())
        .replace("{Name}", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_port_and_name() {
        assert_eq!(
            expand("--listen 0.0.0.0:{Port} --id {Name}", "demo", 8080),
            "--listen 0.0.0.0:8080 --id demo"
        );
    }
}
