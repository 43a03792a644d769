//! The dpaste recipe and recipe files
//!
//! The built-in recipe deploys dpaste the way the OpsWorks demo does: build
//! tools and database headers, git, a Python virtualenv with the app's
//! requirements, deploy and local settings modules, Django migrations and a
//! gunicorn service. Recipe files replace it with an arbitrary resource list.

use anyhow::{Context, Result};
use converge::facts::keys;
use converge::{
    CommandSpec, Facts, Predicate, Recipe, ResourceSpec, RuleTable, ServiceSpec, rules,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::{Config, DatabaseUrl, DjangoConfig, InvalidInput};

/// Settings module written into the checkout
const DEPLOY_SETTINGS: &str =
    "from dpaste.settings.base import *\nfrom dpaste.settings.local_settings import *\n";

/// Django configuration handed to the framework through its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DjangoSettings {
    pub allowed_hosts: Vec<String>,
    pub settings_module: String,
    pub database_url: String,
    pub syncdb: bool,
    pub migrate: bool,
}

impl DjangoSettings {
    /// Allowed hosts are localhost, the public address and the fqdn, when
    /// known, followed by configured extras. Duplicates are dropped.
    pub fn resolve(config: &DjangoConfig, facts: &Facts) -> Self {
        let mut allowed_hosts: Vec<String> = Vec::new();
        let candidates = std::iter::once("localhost")
            .chain(facts.get(keys::CLOUD_PUBLIC_IPV4))
            .chain(facts.get(keys::FQDN))
            .chain(config.allowed_hosts.iter().map(String::as_str));
        for host in candidates.map(str::trim).filter(|h| !h.is_empty()) {
            if !allowed_hosts.iter().any(|h| h == host) {
                allowed_hosts.push(host.to_string());
            }
        }

        Self {
            allowed_hosts,
            settings_module: config.settings_module.clone(),
            database_url: config.database_url.clone(),
            syncdb: config.syncdb,
            migrate: config.migrate,
        }
    }

    pub fn environment(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "DJANGO_SETTINGS_MODULE".to_string(),
                self.settings_module.clone(),
            ),
            ("DATABASE_URL".to_string(), self.database_url.clone()),
            ("ALLOWED_HOSTS".to_string(), self.allowed_hosts.join(",")),
        ])
    }

    /// `local_settings.py` for the deploy settings module to import
    pub fn local_settings(&self) -> Result<String, InvalidInput> {
        let db = DatabaseUrl::parse(&self.database_url)?;
        let hosts: Vec<String> = self.allowed_hosts.iter().map(|h| py_str(h)).collect();

        let mut out = String::from("# Managed by provision\n");
        out.push_str(&format!("ALLOWED_HOSTS = [{}]\n\n", hosts.join(", ")));
        out.push_str("DATABASES = {\n    'default': {\n");
        let fields = [
            ("ENGINE", db.engine),
            ("NAME", db.name.as_str()),
            ("USER", db.user.as_str()),
            ("PASSWORD", db.password.as_str()),
            ("HOST", db.host.as_str()),
            ("PORT", db.port.as_str()),
        ];
        for (key, value) in fields {
            out.push_str(&format!("        '{key}': {},\n", py_str(value)));
        }
        out.push_str("    },\n}\n");
        Ok(out)
    }

    /// `manage.py migrate` arguments, or `None` when neither flag is set
    pub fn migrate_args(&self) -> Option<Vec<String>> {
        if !self.migrate && !self.syncdb {
            return None;
        }
        let mut args = vec!["manage.py".to_string(), "migrate".to_string()];
        if self.syncdb {
            args.push("--run-syncdb".to_string());
        }
        args.push("--noinput".to_string());
        Some(args)
    }
}

/// C compiler and make
pub fn build_tools_package() -> RuleTable {
    RuleTable::new()
        .rule(Predicate::family("debian"), "build-essential")
        .rule(
            Predicate::Any(vec![Predicate::family("rhel"), Predicate::family("fedora")]),
            "gcc",
        )
}

/// Python headers for building extension modules
pub fn python_headers_package(major: &str) -> RuleTable {
    let (debian, rhel) = match major {
        "2" => ("python-dev", "python-devel"),
        _ => ("python3-dev", "python3-devel"),
    };
    RuleTable::new()
        .rule(Predicate::family("debian"), debian)
        .rule(
            Predicate::Any(vec![Predicate::family("rhel"), Predicate::family("fedora")]),
            rhel,
        )
}

/// Package that provides virtualenv creation
pub fn python_venv_package(major: &str) -> RuleTable {
    let rhel_family = Predicate::Any(vec![Predicate::family("rhel"), Predicate::family("fedora")]);
    match major {
        "2" => RuleTable::new()
            .rule(Predicate::family("debian"), "python-virtualenv")
            .rule(rhel_family, "python-virtualenv"),
        _ => RuleTable::new()
            .rule(Predicate::family("debian"), "python3-venv")
            .rule(rhel_family, "python3-pip"),
    }
}

/// Single-quoted Python string literal
fn py_str(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn argv<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter().map(Into::into).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Resources for deploying dpaste on this host.
pub fn dpaste(config: &Config, facts: &Facts) -> Result<Vec<ResourceSpec>> {
    let app = config.app.path();
    let venv = app.join(".venv");
    let bin = venv.join("bin");
    let python = config.app.python.as_str();
    let django = DjangoSettings::resolve(&config.django, facts);
    let environment = django.environment();

    let mut specs = vec![
        ResourceSpec::package_select("build-essential", build_tools_package()),
        ResourceSpec::package_select("db-client", rules::database_client_package()),
        // Ubuntu 14.04 cannot authenticate liberror-perl without --force-yes
        ResourceSpec::package("git", "git").with_override(
            Predicate::All(vec![
                Predicate::platform("ubuntu"),
                Predicate::version("14.04"),
            ]),
            &["--force-yes"],
        ),
        ResourceSpec::package("python", &format!("python{python}")),
        ResourceSpec::package_select("python-dev", python_headers_package(python)),
        ResourceSpec::package_select("python-venv", python_venv_package(python)),
        ResourceSpec::repository("app", &config.app.repository, &app)
            .with_reference(&config.app.reference)
            .critical(),
    ];

    let create_venv = if python == "2" {
        argv(["virtualenv", "-p", "python2", path_arg(&venv).as_str()])
    } else {
        argv(["python3", "-m", "venv", path_arg(&venv).as_str()])
    };
    let mut virtualenv = CommandSpec::new(create_venv);
    virtualenv.cwd = Some(app.clone());
    virtualenv.creates = Some(bin.join("python"));
    specs.push(ResourceSpec::command("virtualenv", virtualenv).critical());

    let mut requirements = CommandSpec::new(argv([
        path_arg(&bin.join("pip")),
        "install".into(),
        "-r".into(),
        "requirements.txt".into(),
    ]));
    requirements.cwd = Some(app.clone());
    requirements.watch = vec![app.join("requirements.txt")];
    specs.push(ResourceSpec::command("pip-requirements", requirements));

    let mut gunicorn_install = CommandSpec::new(argv([
        path_arg(&bin.join("pip")),
        "install".into(),
        "gunicorn".into(),
    ]));
    gunicorn_install.cwd = Some(app.clone());
    gunicorn_install.creates = Some(bin.join("gunicorn"));
    specs.push(ResourceSpec::command("gunicorn-install", gunicorn_install));

    let settings_dir = app.join("dpaste").join("settings");
    let local_settings = settings_dir.join("local_settings.py");
    specs.push(ResourceSpec::file(
        "local-settings",
        &local_settings,
        &django.local_settings()?,
    ));
    specs.push(ResourceSpec::file(
        "settings",
        settings_dir.join("deploy.py"),
        DEPLOY_SETTINGS,
    ));

    let mut restart_on = argv(["app", "pip-requirements", "local-settings", "settings"]);
    if let Some(args) = django.migrate_args() {
        let manage = path_arg(&bin.join("python"));
        let mut migrate = CommandSpec::new(std::iter::once(manage.clone()).chain(args));
        migrate.cwd = Some(app.clone());
        migrate.environment = environment.clone();
        if python == "2" {
            // Django on Python 2 predates `migrate --check`
            migrate.watch = vec![
                app.join("requirements.txt"),
                app.join("dpaste").join("migrations"),
                local_settings,
            ];
        } else {
            migrate.unless = Some(argv([manage.as_str(), "manage.py", "migrate", "--check"]));
        }
        specs.push(ResourceSpec::command("migrate", migrate));
        restart_on.push("migrate".to_string());
    }

    specs.push(ResourceSpec::service(
        "gunicorn",
        ServiceSpec {
            name: config.app.shortname.clone(),
            command: argv([
                path_arg(&bin.join("gunicorn")),
                "--bind".into(),
                config.gunicorn.bind.clone(),
                "--workers".into(),
                config.gunicorn.workers.to_string(),
                config.gunicorn.wsgi_module.clone(),
            ]),
            working_dir: Some(app),
            environment,
            user: config.gunicorn.user.clone(),
            enabled: true,
            restart_on,
        },
    ));

    Ok(specs)
}

/// Load a recipe file: TOML, or JSON when the extension is `.json`.
pub fn load_file(path: &Path) -> Result<Vec<ResourceSpec>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed: Result<Recipe, InvalidInput> = if is_json {
        serde_json::from_str(&content).map_err(|e| InvalidInput::new(e.to_string()))
    } else {
        toml::from_str(&content).map_err(|e| InvalidInput::new(e.to_string()))
    };
    let recipe = parsed.with_context(|| format!("Invalid recipe {}", path.display()))?;

    if recipe.resources.is_empty() {
        return Err(InvalidInput::new(format!("{} declares no resources", path.display())).into());
    }
    Ok(recipe.resources)
}

/// Resources for this run: a recipe file if given, else the dpaste recipe.
pub fn resources(config: &Config, facts: &Facts, file: Option<&Path>) -> Result<Vec<ResourceSpec>> {
    match file {
        Some(path) => load_file(path),
        None => dpaste(config, facts),
    }
}
