//! Expands the tunnel child command template with the runtime values
//! available once a mapping port is known.

use crate::types::TunnelConfig;

pub struct TemplateValues<'a> {
    pub app_name: &'a str,
    pub local_port: u16,
    pub mapping_port: u16,
    pub remote_addr: &'a str,
    pub process_name: &'a str,
    pub process_path: &'a str,
}

impl<'a> TemplateValues<'a> {
    #[must_use]
    pub fn from_config(config: &'a TunnelConfig, mapping_port: u16) -> Self {
        Self {
            app_name: &config.app_name,
            local_port: config.local_port,
            mapping_port,
            remote_addr: &config.remote_addr,
            process_name: &config.process_name,
            process_path: &config.command,
        }
    }

    #[must_use]
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{AppName}", self.app_name)
            .replace("{LocalPort}", &self.local_port.to_string())
            .replace("{MappingPort}", &self.mapping_port.to_string())
            .replace("{RemoteAddr}", self.remote_addr)
            .replace("{ProcessName}", self.process_name)
            .replace("{ProcessPath}", self.process_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_all_placeholders() {
        let config = TunnelConfig {
            name: "demo".to_string(),
            app_name: "demo-app".to_string(),
            client_id: "client-1".to_string(),
            local_port: 8080,
            command: "/bin/tunclient".to_string(),
            args: vec![],
            process_name: "tunclient".to_string(),
            remote_addr: "tun.example.com:443".to_string(),
        };
        let values = TemplateValues::from_config(&config, 7000);
        let out = values.expand(
            "--app {AppName} --local {LocalPort} --remote-port {MappingPort} --addr {RemoteAddr} --name {ProcessName} --path {ProcessPath}",
        );
        assert_eq!(
            out,
            "--app demo-app --local 8080 --remote-port 7000 --addr tun.example.com:443 --name tunclient --path /bin/tunclient"
        );
    }
}
