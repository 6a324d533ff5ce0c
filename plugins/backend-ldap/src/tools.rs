use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use crate::client::{
    DirectoryClient, DirectoryEntry, LdapError, LdapResult, Modification, ResultCode, SearchScope,
};
use crate::ldif;

/// Connection settings for the OpenLDAP command-line tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSettings {
    pub ldap_uri: String,
    pub admin_dn: String,
    pub admin_pw_file: PathBuf,
    pub tls_cacert: Option<PathBuf>,
    /// Directory holding `ldapsearch` and friends; `PATH` lookup when unset
    pub tool_dir: Option<PathBuf>,
}

/// [`DirectoryClient`] running `ldapsearch`, `ldapadd`, `ldapmodify` and
/// `ldapdelete` as subprocesses. A tool's exit status is its LDAP result
/// code.
#[derive(Debug, Clone)]
pub struct LdapToolClient {
    settings: ToolSettings,
}

impl LdapToolClient {
    pub fn new(settings: ToolSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    fn program(&self, tool: &str) -> PathBuf {
        match &self.settings.tool_dir {
            Some(dir) => dir.join(tool),
            None => PathBuf::from(tool),
        }
    }

    /// Arguments shared by every tool: simple bind with the admin DN and a
    /// password file, plus StartTLS when a CA is configured for `ldap://`.
    pub fn connection_args(&self) -> Vec<String> {
        let mut args = vec![
            "-x".to_string(),
            "-H".to_string(),
            self.settings.ldap_uri.clone(),
            "-D".to_string(),
            self.settings.admin_dn.clone(),
            "-y".to_string(),
            self.settings.admin_pw_file.to_string_lossy().into_owned(),
        ];
        if self.settings.tls_cacert.is_some() && self.settings.ldap_uri.starts_with("ldap://") {
            args.push("-ZZ".to_string());
        }
        args
    }

    fn assertion_args(args: &mut Vec<String>, assertion: Option<&str>) {
        if let Some(filter) = assertion {
            args.push("-e".to_string());
            args.push(format!("!assert={}", filter));
        }
    }

    pub fn search_args(&self, base: &str, scope: SearchScope, filter: &str, attributes: &[&str]) -> Vec<String> {
        let mut args = self.connection_args();
        args.extend(
            ["-LLL", "-o", "ldif-wrap=no", "-b", base, "-s", scope.as_arg(), filter]
                .iter()
                .map(|s| s.to_string()),
        );
        args.extend(attributes.iter().map(|s| s.to_string()));
        args
    }

    pub fn modify_args(&self, assertion: Option<&str>) -> Vec<String> {
        let mut args = self.connection_args();
        Self::assertion_args(&mut args, assertion);
        args
    }

    pub fn delete_args(&self, dn: &str, recursive: bool, assertion: Option<&str>) -> Vec<String> {
        let mut args = self.connection_args();
        if recursive {
            args.push("-r".to_string());
        }
        Self::assertion_args(&mut args, assertion);
        args.push(dn.to_string());
        args
    }

    fn run(&self, tool: &str, args: &[String], stdin: Option<&str>) -> LdapResult<Output> {
        let program = self.program(tool);
        let mut command = Command::new(&program);
        command
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cacert) = &self.settings.tls_cacert {
            command.env("LDAPTLS_CACERT", cacert);
        }

        log::trace!("Running {} {:?}", program.display(), args);
        let mut child = command.spawn().map_err(|e| {
            LdapError::new(ResultCode::LOCAL_ERROR, format!("failed to run {}: {}", program.display(), e))
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            if let Err(e) = pipe.write_all(input.as_bytes()) {
                drop(pipe);
                // Reap the child before reporting
                if let Err(kill_error) = child.kill() {
                    log::debug!("Could not kill {}: {}", tool, kill_error);
                }
                if let Err(wait_error) = child.wait() {
                    log::debug!("Could not reap {}: {}", tool, wait_error);
                }
                return Err(LdapError::new(
                    ResultCode::LOCAL_ERROR,
                    format!("failed to write to {}: {}", tool, e),
                ));
            }
        }

        let output = child.wait_with_output().map_err(|e| {
            LdapError::new(ResultCode::LOCAL_ERROR, format!("failed to wait for {}: {}", tool, e))
        })?;

        match output.status.code() {
            Some(0) => Ok(output),
            Some(code) => Err(LdapError::new(
                ResultCode(code as u32),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
            None => Err(LdapError::new(ResultCode::OTHER, format!("{} was terminated by a signal", tool))),
        }
    }
}

impl DirectoryClient for LdapToolClient {
    fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> LdapResult<Vec<DirectoryEntry>> {
        let output = self.run("ldapsearch", &self.search_args(base, scope, filter, attributes), None)?;
        let text = String::from_utf8_lossy(&output.stdout);
        ldif::parse_entries(&text).map_err(|e| LdapError::new(ResultCode::LOCAL_ERROR, e))
    }

    fn add(&self, entry: &DirectoryEntry) -> LdapResult<()> {
        self.run("ldapadd", &self.connection_args(), Some(&ldif::format_add(entry)))
            .map(|_| ())
    }

    fn modify(&self, dn: &str, changes: &[Modification], assertion: Option<&str>) -> LdapResult<()> {
        self.run("ldapmodify", &self.modify_args(assertion), Some(&ldif::format_modify(dn, changes)))
            .map(|_| ())
    }

    fn delete(&self, dn: &str, recursive: bool, assertion: Option<&str>) -> LdapResult<()> {
        self.run("ldapdelete", &self.delete_args(dn, recursive, assertion), None)
            .map(|_| ())
    }
}
