//! Launch and teardown workflows.
//!
//! [`LaunchOrchestrator`] is the only component that touches every other
//! part: it loads the environment, compiles and size-checks the boot script
//! before anything remote changes, resolves a key pair, persists fresh key
//! material, launches through the backend, and records the result in local
//! state.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{BackendError, InstanceBackend, LaunchRequest, LaunchedInstance};
use crate::bootstrap::{self, BootScript};
use crate::config::LabshipConfig;
use crate::credentials::CredentialStore;
use crate::environment::{Environment, EnvironmentLoader};
use crate::keypair::{
    CreatedBy, KeyPairRecord, KeyPairRegistry, KeyPairResolver, KeyPairStrategy,
    PROVENANCE_TAG_KEY, PROVENANCE_TAG_VALUE,
};
use crate::state::{Instance, StateStore};

mod error;

pub use error::LaunchError;

/// Instance tag carrying the environment name.
pub const ENVIRONMENT_TAG_KEY: &str = "Environment";

/// Settings copied from configuration at construction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchSettings {
    /// Region hosting instances and key pairs.
    pub region: String,
    /// Namespace prefix for tool-owned key pairs.
    pub key_prefix: String,
    /// Reuse the default key pair when it exists.
    pub prefer_existing_key: bool,
    /// Security group attached to new instances.
    pub security_group_id: Option<String>,
    /// Idle timeout recorded with each instance.
    pub idle_timeout: String,
}

impl From<&LabshipConfig> for LaunchSettings {
    fn from(config: &LabshipConfig) -> Self {
        Self {
            region: config.region.clone(),
            key_prefix: config.key_prefix.clone(),
            prefer_existing_key: config.prefer_existing_key,
            security_group_id: config.security_group_id.clone(),
            idle_timeout: config.idle_timeout.clone(),
        }
    }
}

/// Per-launch choices supplied by the caller.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LaunchOptions {
    /// Explicit key pair to use instead of the default.
    pub key_name: Option<String>,
    /// Create a fresh key pair even when one could be reused.
    pub force_new_key: bool,
    /// Overrides the environment's instance type.
    pub instance_type: Option<String>,
}

/// Result of a successful launch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchOutcome {
    /// Instance as recorded in local state.
    pub instance: Instance,
    /// Provenance of the key pair used.
    pub key_created_by: CreatedBy,
    /// Local private key file, when one is known for the key pair.
    pub private_key_path: Option<Utf8PathBuf>,
}

/// Result of removing a key pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeyRemoval {
    /// The provider still held the key pair.
    pub remote: bool,
    /// A local private key file was removed.
    pub local: bool,
}

/// Drives launches and teardown against a registry and a backend.
#[derive(Debug)]
pub struct LaunchOrchestrator<R, B> {
    resolver: KeyPairResolver<R>,
    backend: B,
    environments: EnvironmentLoader,
    credentials: CredentialStore,
    state: StateStore,
    settings: LaunchSettings,
}

impl<R, B> LaunchOrchestrator<R, B>
where
    R: KeyPairRegistry,
    B: InstanceBackend,
{
    /// Creates an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        registry: R,
        backend: B,
        environments: EnvironmentLoader,
        credentials: CredentialStore,
        state: StateStore,
        settings: LaunchSettings,
    ) -> Self {
        Self {
            resolver: KeyPairResolver::new(registry, settings.key_prefix.clone()),
            backend,
            environments,
            credentials,
            state,
            settings,
        }
    }

    /// Key pair resolver used for launches.
    #[must_use]
    pub const fn resolver(&self) -> &KeyPairResolver<R> {
        &self.resolver
    }

    /// State store holding launched instances.
    #[must_use]
    pub const fn state(&self) -> &StateStore {
        &self.state
    }

    /// Compiles the boot script for `environment` without launching.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the environment cannot be loaded or the
    /// script exceeds the user-data limit.
    pub fn compile_script(&self, environment: &str) -> Result<BootScript, LaunchError> {
        let environment = self.environments.load(environment)?;
        let script = bootstrap::compile(&environment);
        script.ensure_within_limit(&environment.name)?;
        Ok(script)
    }

    /// Launches an instance of `environment`.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when any step fails. A key pair created before
    /// a later failure is kept, together with its local private key.
    pub fn launch(
        &self,
        environment: &str,
        options: &LaunchOptions,
    ) -> Result<LaunchOutcome, LaunchError> {
        let mut environment = self.environments.load(environment)?;
        if let Some(instance_type) = options
            .instance_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            environment.instance_type = instance_type.to_owned();
        }
        let script = bootstrap::compile(&environment);
        script.ensure_within_limit(&environment.name)?;

        let strategy = KeyPairStrategy {
            prefer_existing: self.settings.prefer_existing_key,
            default_prefix: self.settings.key_prefix.clone(),
            user_specified: options.key_name.clone(),
            region: self.settings.region.clone(),
            force_create: options.force_new_key,
        };
        let key = self.resolver.resolve(&strategy)?;

        let private_key_path = match &key.private_key {
            Some(private_key) => {
                let path = self.credentials.save_private_key(&key.name, private_key)?;
                let recorded = path.clone();
                self.state.update(|state| {
                    state.key_pairs.insert(key.name.clone(), recorded);
                })?;
                Some(path)
            }
            None => {
                let known = self.state.load()?.key_pairs.get(&key.name).cloned();
                if known.is_none() {
                    warn!(
                        key_name = %key.name,
                        "reusing key pair with no local private key; SSH may need a key from elsewhere"
                    );
                }
                known
            }
        };

        let request = instance_tags(&environment.name)
            .into_iter()
            .fold(LaunchRequest::builder(), |builder, (tag, value)| {
                builder.tag(tag, value)
            })
            .image_id(environment.image_id.clone())
            .instance_type(environment.instance_type.clone())
            .key_name(key.name.clone())
            .security_group_id(self.settings.security_group_id.clone())
            .root_volume_gib(environment.root_volume_gib)
            .boot_script(script)
            .client_token(Uuid::new_v4().to_string())
            .build()
            .map_err(LaunchError::Request)?;
        let launched = match self.backend.launch(&request) {
            Ok(launched) => launched,
            Err(err) => {
                if let BackendError::Unconfirmed { instance_id, .. } = &err {
                    // Track it anyway so it can still be terminated.
                    let stranded = LaunchedInstance {
                        id: instance_id.clone(),
                        public_ip: None,
                        security_group_id: None,
                    };
                    self.record(&environment, &key.name, stranded)?;
                    warn!(
                        instance_id = %instance_id,
                        "recorded instance that failed to confirm; terminate it if unused"
                    );
                }
                return Err(LaunchError::Provision(err));
            }
        };

        let instance = self.record(&environment, &key.name, launched)?;
        info!(
            instance_id = %instance.id,
            environment = %instance.environment,
            key_name = %instance.key_name,
            "launched instance"
        );

        Ok(LaunchOutcome {
            instance,
            key_created_by: key.created_by,
            private_key_path,
        })
    }

    fn record(
        &self,
        environment: &Environment,
        key_name: &str,
        launched: LaunchedInstance,
    ) -> Result<Instance, LaunchError> {
        let instance = Instance {
            id: launched.id,
            environment: environment.name.clone(),
            instance_type: environment.instance_type.clone(),
            public_ip: launched.public_ip,
            key_name: key_name.to_owned(),
            launch_time: Utc::now(),
            idle_timeout: self.settings.idle_timeout.clone(),
            tunnel_pid: None,
            region: self.settings.region.clone(),
            security_group_id: launched
                .security_group_id
                .or_else(|| self.settings.security_group_id.clone()),
            image_id: Some(environment.image_id.clone()),
        };
        let recorded = instance.clone();
        self.state.update(|state| {
            state.instances.insert(recorded.id.clone(), recorded);
        })?;
        Ok(instance)
    }

    /// Instances recorded in local state, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::State`] when the state cannot be loaded.
    pub fn instances(&self) -> Result<Vec<Instance>, LaunchError> {
        Ok(self.state.load()?.instances.into_values().collect())
    }

    /// Lists key pairs, optionally only those in the tool's namespace.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::KeyPair`] when the registry listing fails.
    pub fn key_pairs(&self, owned_only: bool) -> Result<Vec<KeyPairRecord>, LaunchError> {
        let records = if owned_only {
            self.resolver.list_owned_by_tool()?
        } else {
            self.resolver.list_all()?
        };
        Ok(records)
    }

    /// Terminates a tracked instance and forgets it.
    ///
    /// An instance the provider no longer knows is still removed from local
    /// state.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::UnknownInstance`] when the id is not tracked
    /// and [`LaunchError::Terminate`] when the provider call fails.
    pub fn terminate(&self, instance_id: &str) -> Result<Instance, LaunchError> {
        let state = self.state.load()?;
        let instance = state
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| LaunchError::UnknownInstance {
                instance_id: instance_id.to_owned(),
            })?;

        match self.backend.terminate(instance_id) {
            Ok(()) => {}
            Err(BackendError::NotFound { .. }) => {
                warn!(instance_id, "instance already gone at the provider");
            }
            Err(source) => {
                return Err(LaunchError::Terminate {
                    instance_id: instance_id.to_owned(),
                    source,
                });
            }
        }
        self.state.prune_by(|tracked| tracked.id == instance_id)?;
        info!(instance_id, "terminated instance");
        Ok(instance)
    }

    /// Deletes a tool-owned key pair remotely and locally.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::KeyPair`] for names outside the tool's
    /// namespace or registry failures, and credential or state errors when
    /// local cleanup fails.
    pub fn delete_key_pair(&self, name: &str) -> Result<KeyRemoval, LaunchError> {
        let remote = self.resolver.delete_owned(name)?;
        let local = self.credentials.remove(name)?;
        let mut state = self.state.load()?;
        if state.key_pairs.remove(name).is_some() {
            self.state.save(&state)?;
        }
        debug!(key_name = name, remote, local, "key pair removed");
        Ok(KeyRemoval { remote, local })
    }

    /// Deregisters an image and prunes instances launched from it. Returns
    /// how many instance records were removed. An image the provider no
    /// longer knows is still pruned locally.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::DeleteImage`] when the provider call fails and
    /// [`LaunchError::State`] when pruning fails.
    pub fn delete_image(&self, image_id: &str) -> Result<usize, LaunchError> {
        match self.backend.deregister_image(image_id) {
            Ok(()) => {}
            Err(BackendError::NotFound { .. }) => {
                warn!(image_id, "image already gone at the provider");
            }
            Err(source) => {
                return Err(LaunchError::DeleteImage {
                    image_id: image_id.to_owned(),
                    source,
                });
            }
        }
        let pruned = self
            .state
            .prune_by(|instance| instance.image_id.as_deref() == Some(image_id))?;
        info!(image_id, pruned, "deleted image");
        Ok(pruned)
    }
}

/// Tags attached to every launched instance.
#[must_use]
pub fn instance_tags(environment: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            String::from(PROVENANCE_TAG_KEY),
            String::from(PROVENANCE_TAG_VALUE),
        ),
        (String::from("Name"), format!("labship-{environment}")),
        (String::from(ENVIRONMENT_TAG_KEY), environment.to_owned()),
    ])
}
