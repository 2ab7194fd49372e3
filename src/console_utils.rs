use std::fmt::Write as _;

use tracing_core::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{
        FmtContext, FormatEvent, FormatFields,
        format::{self, Format, Writer},
    },
    registry::LookupSpan,
};

/// Targets whose messages are meant for the user rather than for debugging
const USER_FACING_TARGETS: [&str; 2] = ["recipe_matrix", "recipe_matrix_variant_config"];

/// Formats events of the resolver as plain terminal output.
///
/// INFO messages of the resolver crates carry the rendered tables and
/// progress lines and are printed as they are. WARN messages of those crates
/// (filtered variant values, unpinned `pin_compatible`, rebuild limits) get a
/// `warning:` prefix. Everything else uses the default format.
pub struct TracingFormatter;

fn is_user_facing(target: &str) -> bool {
    let krate = target.split("::").next().unwrap_or(target);
    USER_FACING_TARGETS.contains(&krate)
}

impl<S, N> FormatEvent<S, N> for TracingFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        let mut buffer = String::new();
        let mut custom_writer = Writer::new(&mut buffer);

        let level = *metadata.level();
        let user_facing = is_user_facing(metadata.target());

        if user_facing && level == Level::INFO {
            ctx.format_fields(custom_writer.by_ref(), event)?;
            buffer.push('\n');
        } else if user_facing && level == Level::WARN {
            write!(
                custom_writer,
                "{} ",
                console::style("warning:").yellow().bold()
            )?;
            ctx.format_fields(custom_writer.by_ref(), event)?;
            buffer.push('\n');
        } else {
            Format::default()
                .without_time()
                .format_event(ctx, custom_writer, event)?;
        }

        writer.write_str(&buffer)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use tracing_subscriber::{fmt::MakeWriter, prelude::*};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn resolver_messages_are_plain() {
        console::set_colors_enabled(false);
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(captured.clone())
                .event_format(TracingFormatter),
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "recipe_matrix::build", "Finalizing host for foo");
            tracing::warn!(target: "recipe_matrix::variant_axes", "not varying numpy");
            tracing::warn!(target: "other_crate", "something else");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "Finalizing host for foo");
        assert_eq!(lines[1], "warning: not varying numpy");
        assert!(lines[2].contains("WARN"));
        assert!(lines[2].contains("other_crate"));
        assert!(lines[2].ends_with("something else"));
    }

    #[test]
    fn user_facing_targets() {
        assert!(is_user_facing("recipe_matrix"));
        assert!(is_user_facing("recipe_matrix::build"));
        assert!(is_user_facing("recipe_matrix_variant_config::combination"));
        assert!(!is_user_facing("recipe_matrix_types"));
        assert!(!is_user_facing("petgraph"));
    }
}
