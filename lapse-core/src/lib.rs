use colored::Colorize;

pub mod crawl;
pub mod data;
pub mod report;
pub mod sink;

pub fn print_banner() {
    let banner = r#"
    __
   / /   ____ _____  ________
  / /   / __ `/ __ \/ ___/ _ \
 / /___/ /_/ / /_/ (__  )  __/
/_____/\__,_/ .___/____/\___/
           /_/
"#;
    println!("{}", banner.bright_cyan().bold());
    println!(
        "  {} {}\n",
        "expired domain finder".bright_blue(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
