//! Contains available options to configure the [WebhookServer][crate::WebhookServer].
use std::net::{IpAddr, SocketAddr};

use crate::constants::DEFAULT_SOCKET_ADDR;

/// Specifies available webhook server options.
///
/// The [`Default`] implementation for this struct contains the following values:
///
/// - The socket binds to 0.0.0.0 on port 9443 (HTTPS)
/// - An empty list of SANs is provided to the certificate the TLS server uses.
#[derive(Debug)]
pub struct Options {
    /// The HTTPS socket address the [`TcpListener`][tokio::net::TcpListener]
    /// binds to.
    pub socket_addr: SocketAddr,

    /// The subject alternative DNS names that should be added to the
    /// certificates generated for this webhook.
    pub subject_alternative_dns_names: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Options {
    /// Returns the default [`OptionsBuilder`] which allows to selectively
    /// customize the options.
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }
}

/// The [`OptionsBuilder`] which allows to selectively customize the webhook
/// server [`Options`].
///
/// Usually, this struct is not constructed manually, but instead by calling
/// [`Options::builder()`] or [`OptionsBuilder::default()`].
#[derive(Debug, Default)]
pub struct OptionsBuilder {
    socket_addr: Option<SocketAddr>,
    subject_alternative_dns_names: Vec<String>,
}

impl OptionsBuilder {
    /// Sets the socket address the webhook server uses to bind for HTTPS.
    pub fn bind_address(mut self, bind_ip: impl Into<IpAddr>, bind_port: u16) -> Self {
        self.socket_addr = Some(SocketAddr::new(bind_ip.into(), bind_port));
        self
    }

    /// Sets the port of the socket address the webhook server uses to bind
    /// for HTTPS.
    pub fn bind_port(mut self, bind_port: u16) -> Self {
        let addr = self.socket_addr.get_or_insert(DEFAULT_SOCKET_ADDR);
        addr.set_port(bind_port);
        self
    }

    /// Adds the subject alternative DNS name to the list of names included in
    /// the generated certificates.
    pub fn add_subject_alternative_dns_name(
        mut self,
        subject_alternative_dns_name: impl Into<String>,
    ) -> Self {
        self.subject_alternative_dns_names
            .push(subject_alternative_dns_name.into());
        self
    }

    /// Builds the final [`Options`] by using default values for any not
    /// explicitly set option.
    pub fn build(self) -> Options {
        Options {
            socket_addr: self.socket_addr.unwrap_or(DEFAULT_SOCKET_ADDR),
            subject_alternative_dns_names: self.subject_alternative_dns_names,
        }
    }
}
