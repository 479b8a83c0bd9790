//! Build context materialization.
//!
//! Every request gets its own freshly created directory holding the source
//! file, the dependency manifest and the recipe. The directory is removed when
//! the [`BuildContext`] is dropped.

use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use code_runner_core::{
    types::{DependencySet, Language},
    Error, Result,
};

use crate::recipe::RecipeSet;

/// Every module in the Python 3.11 standard library (`sys.stdlib_module_names`).
const PYTHON_STDLIB: &[&str] = &[
    "__future__", "_abc", "_aix_support", "_ast", "_asyncio", "_bisect", "_blake2",
    "_bootsubprocess", "_bz2", "_codecs", "_codecs_cn", "_codecs_hk", "_codecs_iso2022",
    "_codecs_jp", "_codecs_kr", "_codecs_tw", "_collections", "_collections_abc",
    "_compat_pickle", "_compression", "_contextvars", "_crypt", "_csv", "_ctypes",
    "_curses", "_curses_panel", "_datetime", "_dbm", "_decimal", "_elementtree",
    "_frozen_importlib", "_frozen_importlib_external", "_functools", "_gdbm",
    "_hashlib", "_heapq", "_imp", "_io", "_json", "_locale", "_lsprof", "_lzma",
    "_markupbase", "_md5", "_msi", "_multibytecodec", "_multiprocessing", "_opcode",
    "_operator", "_osx_support", "_overlapped", "_pickle", "_posixshmem",
    "_posixsubprocess", "_py_abc", "_pydecimal", "_pyio", "_queue", "_random",
    "_scproxy", "_sha1", "_sha256", "_sha3", "_sha512", "_signal", "_sitebuiltins",
    "_socket", "_sqlite3", "_sre", "_ssl", "_stat", "_statistics", "_string",
    "_strptime", "_struct", "_symtable", "_thread", "_threading_local", "_tkinter",
    "_tokenize", "_tracemalloc", "_typing", "_uuid", "_warnings", "_weakref",
    "_weakrefset", "_winapi", "_zoneinfo", "abc", "aifc", "antigravity", "argparse",
    "array", "ast", "asynchat", "asyncio", "asyncore", "atexit", "audioop", "base64",
    "bdb", "binascii", "bisect", "builtins", "bz2", "cProfile", "calendar", "cgi",
    "cgitb", "chunk", "cmath", "cmd", "code", "codecs", "codeop", "collections",
    "colorsys", "compileall", "concurrent", "configparser", "contextlib", "contextvars",
    "copy", "copyreg", "crypt", "csv", "ctypes", "curses", "dataclasses", "datetime",
    "dbm", "decimal", "difflib", "dis", "distutils", "doctest", "email", "encodings",
    "ensurepip", "enum", "errno", "faulthandler", "fcntl", "filecmp", "fileinput",
    "fnmatch", "fractions", "ftplib", "functools", "gc", "genericpath", "getopt",
    "getpass", "gettext", "glob", "graphlib", "grp", "gzip", "hashlib", "heapq", "hmac",
    "html", "http", "idlelib", "imaplib", "imghdr", "imp", "importlib", "inspect", "io",
    "ipaddress", "itertools", "json", "keyword", "lib2to3", "linecache", "locale",
    "logging", "lzma", "mailbox", "mailcap", "marshal", "math", "mimetypes", "mmap",
    "modulefinder", "msilib", "msvcrt", "multiprocessing", "netrc", "nis", "nntplib",
    "nt", "ntpath", "nturl2path", "numbers", "opcode", "operator", "optparse", "os",
    "ossaudiodev", "pathlib", "pdb", "pickle", "pickletools", "pipes", "pkgutil",
    "platform", "plistlib", "poplib", "posix", "posixpath", "pprint", "profile",
    "pstats", "pty", "pwd", "py_compile", "pyclbr", "pydoc", "pydoc_data", "pyexpat",
    "queue", "quopri", "random", "re", "readline", "reprlib", "resource", "rlcompleter",
    "runpy", "sched", "secrets", "select", "selectors", "shelve", "shlex", "shutil",
    "signal", "site", "smtpd", "smtplib", "sndhdr", "socket", "socketserver", "spwd",
    "sqlite3", "sre_compile", "sre_constants", "sre_parse", "ssl", "stat", "statistics",
    "string", "stringprep", "struct", "subprocess", "sunau", "symtable", "sys",
    "sysconfig", "syslog", "tabnanny", "tarfile", "telnetlib", "tempfile", "termios",
    "textwrap", "this", "threading", "time", "timeit", "tkinter", "token", "tokenize",
    "tomllib", "trace", "traceback", "tracemalloc", "tty", "turtle", "turtledemo",
    "types", "typing", "unicodedata", "unittest", "urllib", "uu", "uuid", "venv",
    "warnings", "wave", "weakref", "webbrowser", "winreg", "winsound", "wsgiref",
    "xdrlib", "xml", "xmlrpc", "zipapp", "zipfile", "zipimport", "zlib", "zoneinfo",
];

/// Node.js built-in modules (`module.builtinModules`), subpaths included.
/// Prefix-only modules such as `node:test` are covered by the `node:` check.
const NODE_BUILTINS: &[&str] = &[
    "_http_agent", "_http_client", "_http_common", "_http_incoming", "_http_outgoing",
    "_http_server", "_stream_duplex", "_stream_passthrough", "_stream_readable",
    "_stream_transform", "_stream_wrap", "_stream_writable", "_tls_common", "_tls_wrap",
    "assert", "assert/strict", "async_hooks", "buffer", "child_process", "cluster",
    "console", "constants", "crypto", "dgram", "diagnostics_channel", "dns",
    "dns/promises", "domain", "events", "fs", "fs/promises", "http", "http2", "https",
    "inspector", "inspector/promises", "module", "net", "os", "path", "path/posix",
    "path/win32", "perf_hooks", "process", "punycode", "querystring", "readline",
    "readline/promises", "repl", "stream", "stream/consumers", "stream/promises",
    "stream/web", "string_decoder", "sys", "timers", "timers/promises", "tls",
    "trace_events", "tty", "url", "util", "util/types", "v8", "vm", "wasi",
    "worker_threads", "zlib",
];

/// Whether a discovered dependency has to be installed from a package index.
pub fn is_installable(language: Language, package: &str) -> bool {
    match language {
        Language::Python => !PYTHON_STDLIB.contains(&package),
        Language::JavaScript => {
            !package.starts_with("node:") && !NODE_BUILTINS.contains(&package)
        }
    }
}

/// Render the dependency manifest for a language.
///
/// Python gets a plain requirements list, JavaScript a `package.json` with
/// every package pinned to `latest`.
pub fn render_manifest(language: Language, deps: &DependencySet) -> Result<String> {
    let installable = deps.iter().filter(|p| is_installable(language, p));
    match language {
        Language::Python => {
            let mut manifest = installable.collect::<Vec<_>>().join("\n");
            if !manifest.is_empty() {
                manifest.push('\n');
            }
            Ok(manifest)
        }
        Language::JavaScript => {
            let dependencies: BTreeMap<&str, &str> =
                installable.map(|p| (p, "latest")).collect();
            let package = json!({
                "name": "js-execution",
                "version": "1.0.0",
                "description": "JavaScript code execution",
                "main": language.source_file(),
                "private": true,
                "dependencies": dependencies,
            });
            Ok(serde_json::to_string_pretty(&package)?)
        }
    }
}

/// An isolated, request-scoped build directory.
#[derive(Debug)]
pub struct BuildContext {
    dir: tempfile::TempDir,
    language: Language,
}

impl BuildContext {
    /// Write source, manifest and recipe into a new directory under `root`
    /// (or the OS temp dir when `root` is `None`).
    ///
    /// File I/O runs on the blocking pool.
    pub async fn materialize(
        root: Option<&Path>,
        request_id: &str,
        language: Language,
        source: &str,
        deps: &DependencySet,
        recipes: &RecipeSet,
    ) -> Result<Self> {
        let files = ContextFiles {
            root: root.map(Path::to_path_buf),
            prefix: format!("{}-{}-", language, request_id),
            source_file: language.source_file(),
            source: source.to_string(),
            manifest_file: language.manifest_file(),
            manifest: render_manifest(language, deps)?,
            dockerfile: recipes.dockerfile(language),
        };

        let dir = tokio::task::spawn_blocking(move || files.write())
            .await
            .map_err(|e| Error::internal(format!("Build context task failed: {}", e)))??;

        tracing::debug!(
            request_id = %request_id,
            language = %language,
            path = %dir.path().display(),
            dependencies = deps.len(),
            "Build context materialized"
        );

        Ok(Self { dir, language })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn source_path(&self) -> PathBuf {
        self.path().join(self.language.source_file())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path().join(self.language.manifest_file())
    }

    /// Pack the directory into a tar archive suitable for an image build.
    pub async fn to_tar(&self) -> Result<Vec<u8>> {
        let path = self.path().to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut archive = tar::Builder::new(Vec::new());
            archive.append_dir_all(".", &path)?;
            Ok(archive.into_inner()?)
        })
        .await
        .map_err(|e| Error::internal(format!("Build context packing failed: {}", e)))?
    }
}

/// Everything written into a build context, owned so it can move to the
/// blocking pool.
struct ContextFiles {
    root: Option<PathBuf>,
    prefix: String,
    source_file: &'static str,
    source: String,
    manifest_file: &'static str,
    manifest: String,
    dockerfile: String,
}

impl ContextFiles {
    fn write(self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.prefix);

        let dir = match &self.root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        std::fs::write(dir.path().join(self.source_file), &self.source)?;
        std::fs::write(dir.path().join(self.manifest_file), &self.manifest)?;
        std::fs::write(dir.path().join("Dockerfile"), &self.dockerfile)?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(names: &[&str]) -> DependencySet {
        names.iter().copied().collect()
    }

    #[test]
    fn test_python_manifest_skips_stdlib() {
        let manifest = render_manifest(Language::Python, &deps(&["numpy", "os", "scipy", "sys"])).unwrap();
        assert_eq!(manifest, "numpy\nscipy\n");
    }

    #[test]
    fn test_stdlib_only_program_installs_nothing() {
        let source = "import codecs\nimport locale\nimport email.mime.text\nimport configparser\n\
                      import pdb, numbers, atexit\nfrom getopt import getopt\nimport optparse\n\
                      import tarfile\nimport stat\nimport sched\nfrom contextvars import ContextVar\n\
                      import _thread\nimport cProfile\n";
        let found = crate::extract::extract(source, Language::Python);
        assert_eq!(found.len(), 15);
        assert_eq!(render_manifest(Language::Python, &found).unwrap(), "");

        let mixed = crate::extract::extract("import locale\nimport requests\n", Language::Python);
        assert_eq!(render_manifest(Language::Python, &mixed).unwrap(), "requests\n");
    }

    #[test]
    fn test_node_subpath_builtins_are_not_installed() {
        let source = r#"
const { pipeline } = require('stream/promises');
const { setTimeout } = require('timers/promises');
const dns = require('dns/promises');
const readline = require('readline/promises');
const types = require('util/types');
const assert = require('assert/strict');
const dc = require('diagnostics_channel');
const inspector = require('inspector');
const repl = require('repl');
import test from 'node:test';
import express from 'express';
"#;
        let found = crate::extract::extract(source, Language::JavaScript);
        assert_eq!(found.len(), 11);

        let manifest = render_manifest(Language::JavaScript, &found).unwrap();
        let value: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        let dependencies = value["dependencies"].as_object().unwrap();
        assert_eq!(dependencies.len(), 1);
        assert!(dependencies.contains_key("express"));
    }

    #[test]
    fn test_python_manifest_empty() {
        let manifest = render_manifest(Language::Python, &DependencySet::new()).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_javascript_manifest_pins_latest() {
        let manifest =
            render_manifest(Language::JavaScript, &deps(&["fs", "lodash", "node:path", "uuid"])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        let dependencies = value["dependencies"].as_object().unwrap();
        assert_eq!(dependencies.len(), 2);
        assert_eq!(dependencies["lodash"], "latest");
        assert_eq!(dependencies["uuid"], "latest");
        assert_eq!(value["main"], "user_code.js");
    }

    #[tokio::test]
    async fn test_materialize_writes_files() {
        let root = tempfile::tempdir().unwrap();
        let ctx = BuildContext::materialize(
            Some(root.path()),
            "req-1",
            Language::Python,
            "import numpy\nprint(numpy.__version__)\n",
            &deps(&["numpy"]),
            &RecipeSet::default(),
        )
        .await
        .unwrap();

        assert!(ctx.path().starts_with(root.path()));
        assert_eq!(
            std::fs::read_to_string(ctx.source_path()).unwrap(),
            "import numpy\nprint(numpy.__version__)\n"
        );
        assert_eq!(std::fs::read_to_string(ctx.manifest_path()).unwrap(), "numpy\n");
        assert!(ctx.path().join("Dockerfile").exists());
    }

    #[tokio::test]
    async fn test_each_request_gets_its_own_directory() {
        let root = tempfile::tempdir().unwrap();
        let recipes = RecipeSet::default();
        let a = BuildContext::materialize(
            Some(root.path()), "same", Language::JavaScript, "console.log(1)", &DependencySet::new(), &recipes,
        )
        .await
        .unwrap();
        let b = BuildContext::materialize(
            Some(root.path()), "same", Language::JavaScript, "console.log(2)", &DependencySet::new(), &recipes,
        )
        .await
        .unwrap();

        assert_ne!(a.path(), b.path());
        assert_eq!(std::fs::read_to_string(a.source_path()).unwrap(), "console.log(1)");
        assert_eq!(std::fs::read_to_string(b.source_path()).unwrap(), "console.log(2)");
    }

    #[tokio::test]
    async fn test_directory_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let ctx = BuildContext::materialize(
            Some(root.path()), "req-2", Language::Python, "print(1)", &DependencySet::new(), &RecipeSet::default(),
        )
        .await
        .unwrap();
        let path = ctx.path().to_path_buf();
        assert!(path.exists());
        drop(ctx);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_tar_contains_context_files() {
        let ctx = BuildContext::materialize(
            None, "req-3", Language::Python, "print(1)", &DependencySet::new(), &RecipeSet::default(),
        )
        .await
        .unwrap();
        let bytes = ctx.to_tar().await.unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("Dockerfile")));
        assert!(names.iter().any(|n| n.ends_with("user_code.py")));
        assert!(names.iter().any(|n| n.ends_with("requirements.txt")));
    }
}
