use clap::{Args, Parser, Subcommand};
use geocoder::distance::{build_distance_expression, distance, SqlColumns};
use geocoder::geocode::{
    AccuracyLevel, Coordinate, EntityGeocoder, Fields, FixtureProvider, GeocodeProvider,
    GeocodingPolicy, NominatimProvider, Unit,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Geocode addresses and compute great-circle distances.
///
/// Examples:
///   geocoder geocode --street "Krebenweg 22" --zip 74523 --city Bibersfeld
///   geocoder geocode --city München --allow-inconclusive
///   geocoder distance 52.52,13.405 48.1351,11.582 --unit miles
///   geocoder sql 13.3,19.2 --table Address --alias distance
///   geocoder serve --port 8080 --fixtures fixtures.json
#[derive(Parser)]
#[command(name = "geocoder", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Geocode one address and print the accepted match as JSON.
    Geocode {
        #[arg(long)]
        street: Option<String>,

        #[arg(long)]
        zip: Option<String>,

        #[arg(long)]
        city: Option<String>,

        /// Extra entity field as name=value (repeatable).
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        #[command(flatten)]
        policy: PolicyArgs,

        #[command(flatten)]
        provider: ProviderArgs,
    },

    /// Distance between two "lat,lng" points.
    Distance {
        #[arg(allow_hyphen_values = true)]
        from: Coordinate,

        #[arg(allow_hyphen_values = true)]
        to: Coordinate,

        #[arg(long, default_value = "km")]
        unit: Unit,
    },

    /// Print the SQL distance projection for a reference point.
    Sql {
        #[arg(allow_hyphen_values = true)]
        reference: Coordinate,

        /// Table or model alias to qualify columns with.
        #[arg(long)]
        table: Option<String>,

        #[arg(long, default_value = "lat")]
        lat_column: String,

        #[arg(long, default_value = "lng")]
        lng_column: String,

        /// Render as a select field "... AS <table>.<alias>".
        #[arg(long)]
        alias: Option<String>,

        #[arg(long, default_value = "km")]
        unit: Unit,
    },

    /// Serve the HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, short = 'p', default_value_t = 8080)]
        port: u16,

        #[command(flatten)]
        policy: PolicyArgs,

        #[command(flatten)]
        provider: ProviderArgs,
    },
}

#[derive(Args)]
struct PolicyArgs {
    /// Policy JSON file. Defaults to <config dir>/geocoder/policy.json.
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Least precise accuracy to accept (country, region, sub_locality,
    /// locality, street, exact).
    #[arg(long)]
    min_accuracy: Option<AccuracyLevel>,

    /// Accept matches the provider flags as ambiguous.
    #[arg(long)]
    allow_inconclusive: bool,

    /// Address component every match must contain, e.g. postal_code (repeatable).
    #[arg(long = "expect")]
    expect: Vec<String>,

    #[arg(long)]
    unit: Option<Unit>,

    /// Entity fields joined into the address query, in order (repeatable).
    #[arg(long = "source-field")]
    source_fields: Vec<String>,

    /// Geocode even when the entity already has coordinates.
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args)]
struct ProviderArgs {
    /// Answer from a JSON fixture file instead of the network.
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// Nominatim search endpoint.
    #[arg(long)]
    endpoint: Option<String>,

    /// Preferred language for formatted addresses (e.g. de).
    #[arg(long)]
    language: Option<String>,

    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("Expected name=value, got '{}'", s))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Geocode {
            street,
            zip,
            city,
            fields,
            policy,
            provider,
        } => {
            let geocoder = EntityGeocoder::new(build_provider(&provider), build_policy(&policy));

            let mut entity: Fields = fields.into_iter().collect();
            for (name, value) in [("street", street), ("zip", zip), ("city", city)] {
                if let Some(v) = value {
                    entity.insert(name.to_string(), v);
                }
            }

            match geocoder.geocode(&entity) {
                Ok(Some(geocoded)) => {
                    eprintln!(
                        "  {} [{}] {}",
                        geocoded.formatted_address, geocoded.raw.accuracy, geocoded.coordinate
                    );
                    match serde_json::to_string_pretty(&geocoded) {
                        Ok(json) => println!("{}", json),
                        Err(e) => exit_with(&format!("cannot encode result: {}", e)),
                    }
                }
                Ok(None) => {
                    eprintln!("  Nothing to geocode: no address fields given.");
                    println!("null");
                }
                Err(failure) => {
                    log::debug!("geocoding failed: {:?}", failure);
                    exit_with(&format!("{} ({})", failure.user_message(), failure.code()));
                }
            }
        }

        Command::Distance { from, to, unit } => {
            let d = distance(&from, &to, unit);
            println!("{:.3} {}", d, unit);
        }

        Command::Sql {
            reference,
            table,
            lat_column,
            lng_column,
            alias,
            unit,
        } => {
            let columns = SqlColumns {
                table,
                lat: lat_column,
                lng: lng_column,
            };
            let projection = build_distance_expression(reference, unit).projection();
            match alias {
                Some(alias) => println!("{}", projection.to_sql_field(&columns, &alias)),
                None => println!("{}", projection.to_sql(&columns)),
            }
        }

        Command::Serve {
            host,
            port,
            policy,
            provider,
        } => {
            let timeout = Duration::from_secs(provider.timeout_secs);
            let service = EntityGeocoder::new(build_provider(&provider), build_policy(&policy));
            let runtime = tokio::runtime::Runtime::new()
                .unwrap_or_else(|e| exit_with(&format!("cannot start runtime: {}", e)));
            // Allow one extra second for the HTTP round trip itself.
            runtime.block_on(geocoder::server::start(
                &host,
                port,
                service,
                timeout + Duration::from_secs(1),
            ));
        }
    }
}

fn build_policy(args: &PolicyArgs) -> GeocodingPolicy {
    let loaded = match args.policy {
        Some(ref path) => GeocodingPolicy::load_from(path),
        None => GeocodingPolicy::load(),
    };
    let mut policy = loaded.unwrap_or_else(|e| exit_with(&e.to_string()));

    if let Some(min) = args.min_accuracy {
        policy.min_accuracy = min;
    }
    if args.allow_inconclusive {
        policy.allow_inconclusive = true;
    }
    policy.expected_components.extend(args.expect.iter().cloned());
    if let Some(unit) = args.unit {
        policy.unit = unit;
    }
    if !args.source_fields.is_empty() {
        policy.source_fields = args.source_fields.clone();
    }
    if args.overwrite {
        policy.overwrite = true;
    }
    policy
}

fn build_provider(args: &ProviderArgs) -> Arc<dyn GeocodeProvider> {
    if let Some(ref path) = args.fixtures {
        let fixtures = FixtureProvider::load_from(path).unwrap_or_else(|e| exit_with(&e.to_string()));
        return Arc::new(fixtures);
    }

    let mut nominatim = match args.endpoint {
        Some(ref url) => NominatimProvider::with_endpoint(url.clone()),
        None => NominatimProvider::new(),
    }
    .timeout(Duration::from_secs(args.timeout_secs));
    if let Some(ref lang) = args.language {
        nominatim = nominatim.language(lang.clone());
    }
    Arc::new(nominatim)
}

fn exit_with(msg: &str) -> ! {
    eprintln!("Error: {}", msg);
    std::process::exit(1);
}
