use wtctrl::{PowerMeter, Value, DEFAULT_TTY};

#[tokio::main]
async fn main() -> wtctrl::Result<()> {
    let mut meter = PowerMeter::open(DEFAULT_TTY, None, None).await?;
    eprintln!("Connected to a {}", meter.model());

    // Timestamp, active power, voltage and current on every data update.
    let items = ["T", "P", "V", "I"];
    meter
        .command("configure-data-items", Some(Value::from(&items[..])))
        .await?;

    loop {
        meter.command("wait-data-update", None).await?;
        if let Some(Value::List(values)) = meter.command("read-data", None).await? {
            println!("{}", values.join(", "));
        }
    }
}
