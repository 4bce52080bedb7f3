//! # CLI Flows
//!
//! `ds-sign` commands run in-process against temporary files. No network
//! access beyond a refused loopback connection.

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use clap::Parser;
    use ds_runtime::cli::{run, Cli};
    use shared_crypto::test_support::{p256_leaf, test_ca};
    use tempfile::TempDir;

    struct Workspace {
        dir: TempDir,
        config: PathBuf,
    }

    impl Workspace {
        /// Signer material for the P-256 fixture plus a config trusting the
        /// test root. `extra` is appended to the config file.
        fn new(extra: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let fixture = p256_leaf();
            let roots = dir.path().join("roots.pem");
            std::fs::write(&roots, test_ca().certificate.to_pem().unwrap()).unwrap();
            std::fs::write(dir.path().join("signer.pem"), fixture.certificate.to_pem().unwrap()).unwrap();
            std::fs::write(
                dir.path().join("signer.key"),
                fixture.private_key.to_pem().unwrap().as_bytes(),
            )
            .unwrap();

            let config = dir.path().join("docseal.toml");
            std::fs::write(&config, format!("trust_anchors = [{:?}]\n{extra}", roots)).unwrap();
            Self { dir, config }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn cli(&self, args: &[&str]) -> Cli {
            let config = self.config.to_str().unwrap();
            let argv = ["ds-sign", "--config", config].into_iter().chain(args.iter().copied());
            Cli::try_parse_from(argv).unwrap()
        }
    }

    fn s(path: &Path) -> &str {
        path.to_str().unwrap()
    }

    #[tokio::test]
    async fn test_attached_sign_then_verify_without_content() {
        let ws = Workspace::new("");
        let doc = ws.path("note.txt");
        let sig = ws.path("note.p7m");
        std::fs::write(&doc, b"self-contained").unwrap();

        let signed = run(ws.cli(&[
            "sign",
            s(&doc),
            "--cert",
            s(&ws.path("signer.pem")),
            "--key",
            s(&ws.path("signer.key")),
            "--attached",
            "-o",
            s(&sig),
        ]))
        .await
        .unwrap();
        assert!(signed);

        assert!(run(ws.cli(&["verify", s(&sig), "--json"])).await.unwrap());
    }

    #[tokio::test]
    async fn test_timestamp_against_unreachable_tsa_fails_after_retries() {
        let ws = Workspace::new("retry_attempts = 1\ntimeout_secs = 2\n\n[tsa]\nurl = \"http://127.0.0.1:9/tsr\"\n");
        let doc = ws.path("doc.txt");
        let token = ws.path("doc.tsr");
        std::fs::write(&doc, b"stamp me").unwrap();

        let err = run(ws.cli(&["timestamp", s(&doc), "-o", s(&token)])).await.unwrap_err();
        assert!(format!("{err:#}").contains("127.0.0.1:9"));
        assert!(!token.exists());
    }

    #[tokio::test]
    async fn test_providers_listing_with_nothing_configured() {
        let ws = Workspace::new("");
        assert!(run(ws.cli(&["providers", "--json"])).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_for_unconfigured_provider_fails() {
        let ws = Workspace::new("");
        let err = run(ws.cli(&["keys", "pkcs11"])).await.unwrap_err();
        assert!(err.to_string().contains("pkcs11"));
    }

    #[tokio::test]
    async fn test_bad_config_reported_with_context() {
        let ws = Workspace::new("timeout_secs = 0\n");
        let err = run(ws.cli(&["providers"])).await.unwrap_err();
        assert!(format!("{err:#}").contains("loading configuration"));
    }
}
