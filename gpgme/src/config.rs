//! Context configuration.

use std::mem;
use std::path::{Path, PathBuf};

use crate::engine::{KeylistMode, PinentryMode, Protocol};
use crate::{Context, Error, Module, Result};

/// Returns the default home directory.
///
/// This is `$GNUPGHOME` if set, `~/.gnupg` otherwise.
fn default_home() -> Result<PathBuf> {
    match std::env::var_os("GNUPGHOME") {
        Some(h) if ! h.is_empty() => Ok(h.into()),
        _ => Ok(dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!(
                    "Failed to get users home directory"))?
                .join(".gnupg")),
    }
}

/// Represents a `Context` configuration.
///
/// A context can be configured using the builder pattern with
/// `Context::configure`:
///
/// ```
/// use sequoia_gpgme::{Context, Module, PinentryMode};
///
/// # fn main() -> sequoia_gpgme::Result<()> {
/// let module = Module::in_process()?;
/// let ctx = Context::configure(&module)
///     .ephemeral()
///     .armor(true)
///     .pinentry_mode(PinentryMode::LOOPBACK)
///     .build()?;
/// assert_eq!(ctx.pinentry_mode(), PinentryMode::LOOPBACK);
/// # Ok(())
/// # }
/// ```
///
/// You can also start with the default configuration, and use
/// `Config::set_*` methods to change it:
///
/// ```
/// use sequoia_gpgme::{Context, Module};
///
/// # fn main() -> sequoia_gpgme::Result<()> {
/// let module = Module::in_process()?;
/// let mut cfg = Context::configure(&module);
/// cfg.set_ephemeral();
/// cfg.set_textmode(true);
/// let ctx = cfg.build()?;
/// assert!(ctx.textmode());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    module: Module,
    home: Option<PathBuf>,
    ephemeral: bool,
    protocol: Protocol,
    armor: bool,
    textmode: bool,
    offline: bool,
    include_certs: Option<i32>,
    keylist_mode: Option<KeylistMode>,
    pinentry_mode: Option<PinentryMode>,
    sender: Option<String>,
    locales: Vec<(i32, Option<String>)>,
}

impl Config {
    pub(crate) fn new(module: &Module) -> Self {
        Config {
            module: module.clone(),
            home: None,
            ephemeral: false,
            protocol: Protocol::OPENPGP,
            armor: false,
            textmode: false,
            offline: false,
            include_certs: None,
            keylist_mode: None,
            pinentry_mode: None,
            sender: None,
            locales: Vec::new(),
        }
    }

    /// Finalizes the configuration and returns a `Context`.
    pub fn build(self) -> Result<Context> {
        // An ephemeral home is only created if no home was given
        // explicitly.
        let ephemeral = if self.ephemeral && self.home.is_none() {
            Some(tempfile::Builder::new().prefix("sequoia-gpgme").tempdir()
                 .map_err(Error::from)?)
        } else {
            None
        };

        let home = match (ephemeral.as_ref(), self.home) {
            (Some(tmp), _) => tmp.path().to_path_buf(),
            (None, Some(home)) => home,
            (None, None) => default_home()?,
        };
        let home = home.to_str()
            .ok_or_else(|| Error::InvalidArgument(
                format!("Home directory {:?} is not UTF-8", home)))?
            .to_string();
        log::debug!("Creating context for {}", home);

        let mut session = self.module.engine().new_session()
            .map_err(Error::from)?;
        session.set_engine_info(self.protocol, None, Some(&home))
            .map_err(Error::from)?;
        session.set_protocol(self.protocol).map_err(Error::from)?;
        session.set_armor(self.armor);
        session.set_textmode(self.textmode);
        session.set_offline(self.offline);
        if let Some(n) = self.include_certs {
            session.set_include_certs(n);
        }
        if let Some(mode) = self.keylist_mode {
            session.set_keylist_mode(mode).map_err(Error::from)?;
        }
        if let Some(mode) = self.pinentry_mode {
            session.set_pinentry_mode(mode).map_err(Error::from)?;
        }
        if let Some(sender) = self.sender.as_ref() {
            session.set_sender(Some(sender)).map_err(Error::from)?;
        }
        for (category, value) in self.locales.iter() {
            session.set_locale(*category, value.as_deref())
                .map_err(Error::from)?;
        }

        Ok(Context::from_session(self.module.runtime().clone(), session,
                                 ephemeral))
    }

    /// Sets the home directory.
    pub fn home<P: AsRef<Path>>(mut self, home: P) -> Self {
        self.set_home(home);
        self
    }

    /// Sets the home directory.
    pub fn set_home<P: AsRef<Path>>(&mut self, home: P) -> Option<PathBuf> {
        mem::replace(&mut self.home, Some(home.as_ref().into()))
    }

    /// Makes this context ephemeral.
    ///
    /// Unless a home directory is set, a temporary one is created and
    /// deleted when the context is dropped.
    pub fn ephemeral(mut self) -> Self {
        self.set_ephemeral();
        self
    }

    /// Makes this context ephemeral.
    pub fn set_ephemeral(&mut self) -> bool {
        mem::replace(&mut self.ephemeral, true)
    }

    /// Sets the protocol.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.set_protocol(protocol);
        self
    }

    /// Sets the protocol.
    pub fn set_protocol(&mut self, protocol: Protocol) -> Protocol {
        mem::replace(&mut self.protocol, protocol)
    }

    /// Enables or disables ASCII armor.
    pub fn armor(mut self, yes: bool) -> Self {
        self.set_armor(yes);
        self
    }

    pub fn set_armor(&mut self, yes: bool) -> bool {
        mem::replace(&mut self.armor, yes)
    }

    pub fn textmode(mut self, yes: bool) -> Self {
        self.set_textmode(yes);
        self
    }

    pub fn set_textmode(&mut self, yes: bool) -> bool {
        mem::replace(&mut self.textmode, yes)
    }

    pub fn offline(mut self, yes: bool) -> Self {
        self.set_offline(yes);
        self
    }

    pub fn set_offline(&mut self, yes: bool) -> bool {
        mem::replace(&mut self.offline, yes)
    }

    pub fn include_certs(mut self, nr_of_certs: i32) -> Self {
        self.include_certs = Some(nr_of_certs);
        self
    }

    pub fn keylist_mode(mut self, mode: KeylistMode) -> Self {
        self.keylist_mode = Some(mode);
        self
    }

    pub fn pinentry_mode(mut self, mode: PinentryMode) -> Self {
        self.pinentry_mode = Some(mode);
        self
    }

    pub fn sender<S: Into<String>>(mut self, sender: S) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Sets a locale category.
    ///
    /// May be given multiple times; categories are set in order.
    pub fn locale(mut self, category: i32, value: Option<&str>) -> Self {
        self.locales.push((category, value.map(Into::into)));
        self
    }
}
