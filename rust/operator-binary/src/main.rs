use std::sync::Arc;

use clap::{crate_description, crate_version, Parser};
use custom_issuer_operator::{
    certificate_request_controller, crd::CustomIssuer, issuer_controller, store::KubeStore,
    validator::StaticCredentialValidator, APP_NAME, OPERATOR_NAME,
};
use stackable_operator::{logging::TracingTarget, namespace::WatchNamespace, CustomResourceExt};

#[derive(clap::Parser)]
#[clap(author, version)]
struct Opts {
    #[clap(subcommand)]
    cmd: stackable_operator::cli::Command<CustomIssuerOperatorRun>,
}

#[derive(clap::Parser)]
struct CustomIssuerOperatorRun {
    /// Namespace to watch for CustomIssuers and CertificateRequests, or all namespaces if empty
    #[arg(long, env, default_value = "")]
    watch_namespace: WatchNamespace,
    /// Tracing log collector system
    #[arg(long, env, default_value_t, value_enum)]
    tracing_target: TracingTarget,
    /// User that CustomIssuers must present to be accepted
    #[arg(long, env, default_value = "user")]
    authority_user: String,
    /// Password that CustomIssuers must present to be accepted
    #[arg(long, env, default_value = "password", hide_env_values = true)]
    authority_password: String,
}

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
    pub const TARGET: Option<&str> = option_env!("TARGET");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        stackable_operator::cli::Command::Crd => {
            CustomIssuer::print_yaml_schema()?;
        }
        stackable_operator::cli::Command::Run(CustomIssuerOperatorRun {
            watch_namespace,
            tracing_target,
            authority_user,
            authority_password,
        }) => {
            stackable_operator::logging::initialize_logging(
                "CUSTOM_ISSUER_OPERATOR_LOG",
                APP_NAME,
                tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                crate_description!(),
                crate_version!(),
                built_info::GIT_VERSION,
                built_info::TARGET.unwrap_or("unknown target"),
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );
            let client =
                stackable_operator::client::create_client(Some(OPERATOR_NAME.to_string())).await?;
            let store = KubeStore::new(client.as_kube_client());
            let issuer_ctx = Arc::new(issuer_controller::Ctx {
                store: store.clone(),
                validator: Arc::new(StaticCredentialValidator::new(
                    authority_user,
                    authority_password,
                )),
            });
            let certificate_request_ctx = Arc::new(certificate_request_controller::Ctx { store });
            futures::future::join(
                issuer_controller::start(&client, &watch_namespace, issuer_ctx),
                certificate_request_controller::start(
                    &client,
                    &watch_namespace,
                    certificate_request_ctx,
                ),
            )
            .await;
        }
    }
    Ok(())
}
