use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use log::info;
use steps::{GroupDraft, NewStep, PublicStepsService, StepNode};
use steps_persistence::DieselStepRepository;

/// Pequeño menú interactivo para administrar grupos públicos de pasos usando
/// el repositorio proporcionado por `steps-persistence`.
///
/// Opciones soportadas:
/// 1) Listar grupos de un proyecto
/// 2) Ver grupo (árbol y JSON)
/// 3) Crear paso
/// 4) Crear grupo
/// 5) Duplicar grupo
/// 6) Eliminar grupo
/// 7) Conteo de tablas
/// 8) Salir
fn main() -> Result<(), Box<dyn Error>> {
    // .env antes del logger para que RUST_LOG pueda venir del archivo.
    steps_persistence::init_dotenv();
    env_logger::Builder::from_default_env().format_timestamp_millis().init();
    // Inicializar repo (aplica migraciones embebidas si procede)
    let repo = Arc::new(DieselStepRepository::new_from_env()?);
    let service = PublicStepsService::new(repo.clone());
    info!("main-core iniciado");

    loop {
        println!("\n== Public steps CLI menu ==");
        println!("1) Listar grupos de un proyecto");
        println!("2) Ver grupo");
        println!("3) Crear paso");
        println!("4) Crear grupo");
        println!("5) Duplicar grupo");
        println!("6) Eliminar grupo");
        println!("7) Conteo de tablas");
        println!("8) Salir");
        print!("Elige una opción: ");
        io::stdout().flush().ok();

        let mut choice = String::new();
        io::stdin().read_line(&mut choice)?;
        match choice.trim() {
            "1" => {
                let Some(project_id) = prompt_i64("Project id: ")? else { continue };
                let platform = prompt("Plataforma (enter para todas): ")?;
                if platform.trim().is_empty() {
                    match service.list_by_project(project_id) {
                        Ok(groups) => {
                            println!("\nID       | PLATAFORMA | PASOS | NOMBRE");
                            println!("---------------------------------------------");
                            for g in groups {
                                println!("{:<8} | {:<10} | {:<5} | {}",
                                         g.group.id,
                                         g.group.platform,
                                         g.step_count(),
                                         g.group.name);
                            }
                        }
                        Err(e) => eprintln!("Error listando grupos: {}", e),
                    }
                } else {
                    let Some(platform) = parse_platform(&platform) else { continue };
                    match service.list_by_project_and_platform(project_id, platform) {
                        Ok(groups) => {
                            for g in groups {
                                println!("{} | {}", g.id, g.name);
                            }
                        }
                        Err(e) => eprintln!("Error listando grupos: {}", e),
                    }
                }
            }
            "2" => {
                let Some(id) = prompt_i64("Group id: ")? else { continue };
                match service.find_by_id(id) {
                    Ok(Some(view)) => {
                        println!("\n{} ({})", view.group.name, view.group.id);
                        for node in &view.steps {
                            print_tree(node, 1);
                        }
                        let json = prompt("¿Ver JSON? (y/N): ")?;
                        if json.trim().eq_ignore_ascii_case("y") {
                            println!("{}", serde_json::to_string_pretty(&view)?);
                        }
                    }
                    Ok(None) => println!("Grupo {} no existe", id),
                    Err(e) => eprintln!("Error leyendo grupo: {}", e),
                }
            }
            "3" => {
                let Some(parent_id) = prompt_i64("Parent step id (0 para raíz): ")? else { continue };
                let Some(sort) = prompt_i64("Sort (número entero): ")? else { continue };
                let step_type = prompt("Tipo de paso (ej: click): ")?;
                let text = prompt("Texto: ")?;
                let elements_s = prompt("Elementos (ids separados por coma, enter para ninguno): ")?;
                let elements: Vec<i64> = match elements_s.split(',')
                                                         .map(str::trim)
                                                         .filter(|s| !s.is_empty())
                                                         .map(str::parse)
                                                         .collect()
                {
                    Ok(v) => v,
                    Err(_) => { eprintln!("Lista de elementos inválida"); continue; }
                };
                let draft = NewStep { parent_id,
                                      sort,
                                      step_type: step_type.trim().to_string(),
                                      text: text.trim().to_string(),
                                      ..Default::default() };
                match service.create_step(draft, &elements) {
                    Ok(step) => println!("Paso creado: {}", step.id),
                    Err(e) => eprintln!("Error creando paso: {}", e),
                }
            }
            "4" => {
                let name = prompt("Nombre: ")?;
                let Some(project_id) = prompt_i64("Project id: ")? else { continue };
                let Some(platform) = parse_platform(&prompt("Plataforma: ")?) else { continue };
                let roots_s = prompt("Pasos raíz (ids separados por coma): ")?;
                let step_ids: Vec<i64> = match roots_s.split(',')
                                                      .map(str::trim)
                                                      .filter(|s| !s.is_empty())
                                                      .map(str::parse)
                                                      .collect()
                {
                    Ok(v) => v,
                    Err(_) => { eprintln!("Lista de pasos inválida"); continue; }
                };
                let draft = GroupDraft { id: None,
                                         name: name.trim().to_string(),
                                         project_id,
                                         platform,
                                         step_ids };
                match service.save_group(draft) {
                    Ok(g) => println!("Grupo creado: {}", g.id),
                    Err(e) => eprintln!("Error creando grupo: {}", e),
                }
            }
            "5" => {
                let Some(id) = prompt_i64("Group id a duplicar: ")? else { continue };
                match service.duplicate_with_report(id) {
                    Ok(r) => println!("Grupo {} duplicado como {} ({} pasos, {} enlaces a elementos)",
                                      r.source_group_id,
                                      r.new_group_id,
                                      r.cloned_steps.len(),
                                      r.element_links),
                    Err(e) => eprintln!("Error duplicando grupo: {}", e),
                }
            }
            "6" => {
                let Some(id) = prompt_i64("Group id a eliminar: ")? else { continue };
                let confirm = prompt(&format!("Confirma borrado de {}? escribir 'yes' para confirmar: ", id))?;
                if confirm.trim().to_lowercase() == "yes" {
                    match service.delete(id) {
                        Ok(true) => println!("Grupo eliminado: {}", id),
                        Ok(false) => println!("Grupo {} no existe", id),
                        Err(e) => eprintln!("Error eliminando grupo: {}", e),
                    }
                } else {
                    println!("Borrado cancelado");
                }
            }
            "7" => match repo.table_counts() {
                Ok(c) => println!("grupos={} pasos={} enlaces_grupo={} enlaces_elemento={}",
                                  c.groups, c.steps, c.group_links, c.element_links),
                Err(e) => eprintln!("Error contando filas: {}", e),
            },
            "8" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    Ok(())
}

fn print_tree(node: &StepNode, depth: usize) {
    println!("{}- [{}] {} {} (sort={}, elementos={:?})",
             "  ".repeat(depth),
             node.step.id,
             node.step.step_type,
             node.step.text,
             node.step.sort,
             node.elements);
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}

/// Pide un entero; `None` (con aviso) si la entrada no es válida.
fn prompt_i64(msg: &str) -> io::Result<Option<i64>> {
    let s = prompt(msg)?;
    match s.trim().parse() {
        Ok(n) => Ok(Some(n)),
        Err(_) => {
            eprintln!("Número inválido");
            Ok(None)
        }
    }
}

/// Plataforma como `i32`; fuera de rango o no numérica es inválida.
fn parse_platform(input: &str) -> Option<i32> {
    match input.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            eprintln!("Plataforma inválida");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_platform;

    #[test]
    fn platform_out_of_i32_range_is_rejected() {
        assert_eq!(parse_platform(" 2\n"), Some(2));
        assert_eq!(parse_platform("4294967298"), None);
        assert_eq!(parse_platform("web"), None);
    }
}
