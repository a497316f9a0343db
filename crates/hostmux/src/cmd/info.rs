use crate::cmd::{ensure, InfoArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_info, InfoOutput, OutputFormat};

pub async fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let (manager, timeout) = args.connect.manager()?;
    let transport = ensure(&manager, timeout).await?;

    let out = InfoOutput {
        schema_id: "https://schemas.3leaps.dev/hostmux/cli/v1/session-info.schema.json",
        endpoint: transport.endpoint().to_string(),
        channel_seed: transport.channel_seed(),
        default_host: transport.default_host(),
        user: manager.session().user(),
        system: manager.session().system(),
        connected: transport.is_ready(),
    };

    manager.close(None);
    transport.finished().await;

    print_info(&out, format);
    Ok(SUCCESS)
}
